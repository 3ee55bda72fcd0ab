//! Reasoning engine backend seam

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::types::{MessageRequest, MessageResponse};
use crate::LlmError;

/// LLM Backend trait
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Run one model turn.
    ///
    /// When `deltas` is set the response is streamed and each text delta is
    /// forwarded as it arrives. The returned response is complete either way.
    async fn create_message(
        &self,
        request: &MessageRequest,
        deltas: Option<mpsc::Sender<String>>,
    ) -> Result<MessageResponse, LlmError>;

    /// Check if the backend can serve requests
    async fn is_available(&self) -> bool {
        true
    }

    fn model_name(&self) -> &str;
}
