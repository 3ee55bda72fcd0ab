//! Conversation persistence for the voice gateway
//!
//! Provides storage for:
//! - Conversation sessions keyed by caller identifier and source
//! - Ordered message history per session
//! - Notes taken by the agent
//!
//! Backed by ScyllaDB, or by an in-memory store with the same semantics.

pub mod client;
pub mod conversations;
pub mod error;
pub mod memory;
pub mod schema;

pub use client::{ScyllaClient, ScyllaConfig};
pub use conversations::{
    note_bucket, ConversationStore, ScyllaConversationStore, DEFAULT_NOTE_LIMIT,
};
pub use error::PersistenceError;
pub use memory::InMemoryConversationStore;

use std::time::Duration;

/// Connect to ScyllaDB, ensure the schema and return the store
pub async fn init(
    config: ScyllaConfig,
    session_expiry: Duration,
) -> Result<ScyllaConversationStore, PersistenceError> {
    let client = ScyllaClient::connect(config).await?;
    client.ensure_schema().await?;
    Ok(ScyllaConversationStore::new(client, session_expiry))
}
