//! Reasoning engine integration
//!
//! Features:
//! - Anthropic Messages API with native `tool_use` / `tool_result` blocks
//! - SSE streaming of text deltas with tool input accumulation
//! - Canned demo backend for running without credentials

pub mod backend;
pub mod claude;
pub mod demo;
pub mod types;

pub use backend::LlmBackend;
pub use claude::{ClaudeBackend, ClaudeConfig};
pub use demo::DemoBackend;
pub use types::{
    ContentBlock, Message, MessageRequest, MessageResponse, StopReason, ToolCall, ToolDefinition,
    Usage,
};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Timeout")]
    Timeout,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
