//! Core types for the voice gateway
//!
//! This crate provides foundational types used across all other crates:
//! - Audio codec bridge (mu-law / PCM / resampling)
//! - Conversation, session and note types
//! - Session lifecycle events and the publisher seam

pub mod audio;
pub mod conversation;
pub mod events;

pub use audio::{AudioEncoding, AudioFormat, SampleRate};
pub use conversation::{
    CallMode, ChatMessage, LoadedSession, Note, Role, SessionRecord, SessionSource,
};
pub use events::{unix_timestamp, EventPublisher, SessionEvent};
