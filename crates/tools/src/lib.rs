//! Agent tools
//!
//! Tools the reasoning engine can call mid-turn:
//! - `take_note` / `search_notes` over the conversation store
//! - `read_file` / `write_file` restricted to allowed roots
//! - `run_command` with a blocklist and timeout
//! - `send_sms`, `mqtt_publish` and `charlotte_status` integrations

pub mod filesystem;
pub mod integrations;
pub mod notes;
pub mod registry;
pub mod schema;
pub mod shell;

pub use filesystem::{ReadFileTool, WriteFileTool};
pub use integrations::{PublishMessageTool, SendSmsTool, StatusTool};
pub use notes::{SearchNotesTool, TakeNoteTool};
pub use registry::{create_registry, ToolRegistry};
pub use schema::{InputSchema, PropertySchema, Tool, ToolSchema};
pub use shell::RunCommandTool;

use thiserror::Error;

/// Tool execution errors. Display text is what the model sees after `Error: `.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("{tool} timed out after {secs} seconds")]
    Timeout { tool: String, secs: u64 },

    #[error("{0}")]
    Execution(String),
}

impl ToolError {
    pub fn not_found(name: impl Into<String>) -> Self {
        ToolError::NotFound(name.into())
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        ToolError::InvalidParams(message.into())
    }

    pub fn timeout(tool: impl Into<String>, secs: u64) -> Self {
        ToolError::Timeout {
            tool: tool.into(),
            secs,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        ToolError::Execution(message.into())
    }
}

impl From<voice_gateway_persistence::PersistenceError> for ToolError {
    fn from(err: voice_gateway_persistence::PersistenceError) -> Self {
        ToolError::Execution(err.to_string())
    }
}
