//! Canned backend for running without credentials

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backend::LlmBackend;
use crate::types::{ContentBlock, MessageRequest, MessageResponse, StopReason, Usage};
use crate::LlmError;

/// Keyword-matched canned replies. Never calls tools, never touches the network.
#[derive(Debug, Default, Clone)]
pub struct DemoBackend;

impl DemoBackend {
    pub fn new() -> Self {
        Self
    }

    /// Reply for the latest user text
    pub fn reply_for(text: &str) -> &'static str {
        let lower = text.to_lowercase();
        let has_word = |w: &str| {
            lower
                .split(|c: char| !c.is_alphanumeric())
                .any(|token| token == w)
        };

        if has_word("hello") || has_word("hi") || has_word("hey") {
            "Hey! I'm Charlotte, running in demo mode. What can I help with?"
        } else if lower.contains("note") {
            "I've saved that note for you. You can search for it anytime."
        } else if lower.contains("status") {
            "All systems nominal. Running in demo mode, no API calls active."
        } else if lower.contains("what can you") {
            "I can take notes, read and write files, and run shell commands. What do you need?"
        } else {
            "Got it. I'm in demo mode right now, so I'm giving canned responses. Connect the API keys for the full experience."
        }
    }
}

#[async_trait]
impl LlmBackend for DemoBackend {
    async fn create_message(
        &self,
        request: &MessageRequest,
        deltas: Option<mpsc::Sender<String>>,
    ) -> Result<MessageResponse, LlmError> {
        let last = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == voice_gateway_core::Role::User)
            .map(|m| m.text())
            .unwrap_or_default();

        let reply = Self::reply_for(&last).to_string();
        if let Some(tx) = deltas {
            let _ = tx.send(reply.clone()).await;
        }

        Ok(MessageResponse {
            content: vec![ContentBlock::Text { text: reply }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }

    fn model_name(&self) -> &str {
        "demo"
    }
}
