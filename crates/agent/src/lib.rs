//! Conversational agent
//!
//! Features:
//! - Bounded reasoning/tool loop with sentence streaming
//! - Voice-optimized system prompt with per-source addenda
//! - Call overlays: meeting minutes and briefings
//! - Speaking profile that adapts response length
//! - SMS entity modes with entity carry-over

pub mod agent;
pub mod call;
pub mod modes;
pub mod profile;
pub mod prompt;
pub mod session;
pub mod sms;
pub mod text;

pub use agent::{
    RespondOptions, ToolGate, VoiceAgent, VoiceAgentConfig, EMPTY_REPLY, ENGINE_ERROR_REPLY,
    ROUNDS_EXHAUSTED_REPLY,
};
pub use call::{CallConversation, CallConversationConfig};
pub use modes::{BriefingState, MinutesEntry, MinutesState};
pub use profile::{SpeakingProfile, SpeakingStyle};
pub use prompt::{build_system_prompt, PromptSource, SYSTEM_PROMPT};
pub use session::ConversationSession;
pub use sms::{EntityMode, EntityQuery, SmsCommand, SmsThread};
pub use text::{TextResponder, APP_DEFAULT_IDENTIFIER, DEMO_IDENTIFIER};

use thiserror::Error;

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Response cancelled")]
    Cancelled,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

impl From<voice_gateway_pipeline::PipelineError> for AgentError {
    fn from(err: voice_gateway_pipeline::PipelineError) -> Self {
        if err.is_cancelled() {
            AgentError::Cancelled
        } else {
            AgentError::Pipeline(err.to_string())
        }
    }
}

impl From<voice_gateway_llm::LlmError> for AgentError {
    fn from(err: voice_gateway_llm::LlmError) -> Self {
        AgentError::Llm(err.to_string())
    }
}

impl From<voice_gateway_tools::ToolError> for AgentError {
    fn from(err: voice_gateway_tools::ToolError) -> Self {
        AgentError::Tool(err.to_string())
    }
}

impl From<voice_gateway_persistence::PersistenceError> for AgentError {
    fn from(err: voice_gateway_persistence::PersistenceError) -> Self {
        AgentError::Persistence(err.to_string())
    }
}

impl From<AgentError> for voice_gateway_pipeline::PipelineError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Cancelled => voice_gateway_pipeline::PipelineError::Cancelled,
            other => voice_gateway_pipeline::PipelineError::Handler(other.to_string()),
        }
    }
}
