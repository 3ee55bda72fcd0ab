//! Claude backend with native tool use
//!
//! Implements the Anthropic Messages API. Tool calls arrive as `tool_use`
//! blocks and results go back as `tool_result` blocks in a user message.
//! Streaming responses are decoded from SSE with `input_json_delta`
//! accumulation for tool inputs.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::backend::LlmBackend;
use crate::types::{
    ContentBlock, Message, MessageRequest, MessageResponse, StopReason, ToolDefinition, Usage,
};
use crate::LlmError;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Configuration for Claude backend
#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub api_key: String,
    pub model: String,
    /// Used when a request does not set its own budget
    pub max_tokens: u32,
    pub timeout: Duration,
    /// API endpoint (for testing or proxy)
    pub endpoint: String,
    /// Retries for overload and transport errors before any output
    pub max_retries: u32,
    /// Initial backoff, doubled on each retry
    pub initial_backoff: Duration,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "claude-sonnet-4-5-20250929".to_string(),
            max_tokens: 500,
            timeout: Duration::from_secs(60),
            endpoint: "https://api.anthropic.com".to_string(),
            max_retries: 2,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl ClaudeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Claude backend
pub struct ClaudeBackend {
    config: ClaudeConfig,
    client: Client,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::Configuration(
                "ANTHROPIC_API_KEY not set. Set it via environment or config.".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn build_request<'a>(&'a self, request: &'a MessageRequest, stream: bool) -> ClaudeRequest<'a> {
        ClaudeRequest {
            model: &self.config.model,
            max_tokens: if request.max_tokens > 0 {
                request.max_tokens
            } else {
                self.config.max_tokens
            },
            system: (!request.system.is_empty()).then_some(request.system.as_str()),
            messages: &request.messages,
            tools: (!request.tools.is_empty()).then_some(request.tools.as_slice()),
            stream,
        }
    }

    /// POST with retry on overload and transport failure
    async fn send(&self, body: &ClaudeRequest<'_>) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/v1/messages", self.config.endpoint.trim_end_matches('/'));
        let mut backoff = self.config.initial_backoff;
        let mut attempt = 0;

        loop {
            let result = self
                .client
                .post(&url)
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(body)
                .send()
                .await;

            let retryable = match &result {
                Ok(response) => is_retryable(response.status()),
                Err(e) => e.is_connect() || e.is_timeout(),
            };

            if retryable && attempt < self.config.max_retries {
                attempt += 1;
                tracing::warn!(
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Retrying Claude request"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
                continue;
            }

            let response = result?;
            let status = response.status();
            if !status.is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(LlmError::Api(format!("HTTP {}: {}", status, error_text)));
            }
            return Ok(response);
        }
    }

    async fn complete(&self, request: &MessageRequest) -> Result<MessageResponse, LlmError> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;

        let response: ClaudeApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Ok(MessageResponse {
            content: response.content,
            stop_reason: response.stop_reason.unwrap_or_default(),
            usage: response.usage,
        })
    }

    async fn stream(
        &self,
        request: &MessageRequest,
        tx: mpsc::Sender<String>,
    ) -> Result<MessageResponse, LlmError> {
        let body = self.build_request(request, true);
        let response = self.send(&body).await?;

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut accumulator = StreamAccumulator::default();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| LlmError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(line_end) = buffer.find('\n') {
                let line = buffer[..line_end].trim().to_string();
                buffer.drain(..=line_end);

                let Some(event) = parse_sse_line(&line) else {
                    continue;
                };
                if let Some(text) = accumulator.apply(event)? {
                    // Receiver gone means the turn was abandoned; keep
                    // draining so the response is still complete.
                    let _ = tx.send(text).await;
                }
            }
        }

        Ok(accumulator.finish())
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::BAD_GATEWAY
        || status == StatusCode::SERVICE_UNAVAILABLE
        || status.as_u16() == 529
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    async fn create_message(
        &self,
        request: &MessageRequest,
        deltas: Option<mpsc::Sender<String>>,
    ) -> Result<MessageResponse, LlmError> {
        let start = std::time::Instant::now();
        let response = match deltas {
            Some(tx) => self.stream(request, tx).await?,
            None => self.complete(request).await?,
        };

        tracing::debug!(
            model = %self.config.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            stop_reason = ?response.stop_reason,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Claude turn complete"
        );

        Ok(response)
    }

    async fn is_available(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Decode one SSE line into a stream event. Non-data lines yield `None`.
fn parse_sse_line(line: &str) -> Option<ClaudeStreamEvent> {
    let json_str = line.strip_prefix("data:")?.trim_start();
    if json_str.is_empty() || json_str == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<ClaudeStreamEvent>(json_str) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::trace!(error = %e, "Skipping unrecognised stream event");
            None
        }
    }
}

/// Block being assembled from deltas
enum PendingBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        input_json: String,
    },
}

/// Folds stream events into a complete response
#[derive(Default)]
struct StreamAccumulator {
    content: Vec<ContentBlock>,
    pending: Option<PendingBlock>,
    stop_reason: StopReason,
    usage: Usage,
}

impl StreamAccumulator {
    /// Apply one event; returns a text delta to forward, if any
    fn apply(&mut self, event: ClaudeStreamEvent) -> Result<Option<String>, LlmError> {
        match event {
            ClaudeStreamEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    self.usage.input_tokens = usage.input_tokens;
                }
            }
            ClaudeStreamEvent::ContentBlockStart { content_block, .. } => {
                self.close_pending();
                self.pending = match content_block {
                    ContentBlock::Text { text } => Some(PendingBlock::Text(text)),
                    ContentBlock::ToolUse { id, name, .. } => Some(PendingBlock::ToolUse {
                        id,
                        name,
                        input_json: String::new(),
                    }),
                    ContentBlock::ToolResult { .. } => None,
                };
            }
            ClaudeStreamEvent::ContentBlockDelta { delta, .. } => match delta {
                ClaudeDelta::TextDelta { text } => {
                    match &mut self.pending {
                        Some(PendingBlock::Text(buf)) => buf.push_str(&text),
                        _ => self.pending = Some(PendingBlock::Text(text.clone())),
                    }
                    return Ok(Some(text));
                }
                ClaudeDelta::InputJsonDelta { partial_json } => {
                    if let Some(PendingBlock::ToolUse { input_json, .. }) = &mut self.pending {
                        input_json.push_str(&partial_json);
                    }
                }
                ClaudeDelta::Other => {}
            },
            ClaudeStreamEvent::ContentBlockStop { .. } => self.close_pending(),
            ClaudeStreamEvent::MessageDelta { delta, usage } => {
                if let Some(reason) = delta.stop_reason {
                    self.stop_reason = reason;
                }
                if let Some(u) = usage {
                    self.usage.output_tokens = u.output_tokens;
                }
            }
            ClaudeStreamEvent::Error { error } => {
                return Err(LlmError::Api(error.message));
            }
            ClaudeStreamEvent::MessageStop | ClaudeStreamEvent::Ping => {}
        }
        Ok(None)
    }

    fn close_pending(&mut self) {
        match self.pending.take() {
            Some(PendingBlock::Text(text)) => {
                if !text.is_empty() {
                    self.content.push(ContentBlock::Text { text });
                }
            }
            Some(PendingBlock::ToolUse {
                id,
                name,
                input_json,
            }) => {
                let input = if input_json.trim().is_empty() {
                    serde_json::Value::Object(Default::default())
                } else {
                    serde_json::from_str(&input_json).unwrap_or_else(|e| {
                        tracing::warn!(tool = %name, error = %e, "Malformed tool input");
                        serde_json::Value::Object(Default::default())
                    })
                };
                self.content.push(ContentBlock::ToolUse { id, name, input });
            }
            None => {}
        }
    }

    fn finish(mut self) -> MessageResponse {
        self.close_pending();
        MessageResponse {
            content: self.content,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

// =============================================================================
// Claude API Types
// =============================================================================

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ClaudeApiResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<StopReason>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[allow(dead_code)] // Fields required for serde deserialization
enum ClaudeStreamEvent {
    MessageStart {
        message: ClaudeMessageStart,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: ClaudeDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: ClaudeMessageDeltaBody,
        usage: Option<ClaudeUsageDelta>,
    },
    MessageStop,
    Ping,
    Error {
        error: ClaudeError,
    },
}

#[derive(Debug, Deserialize)]
struct ClaudeMessageStart {
    usage: Option<ClaudeUsageStart>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsageStart {
    input_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ClaudeMessageDeltaBody {
    stop_reason: Option<StopReason>,
}

#[derive(Debug, Deserialize)]
struct ClaudeUsageDelta {
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ClaudeError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn accumulate(lines: &[&str]) -> (Vec<String>, MessageResponse) {
        let mut acc = StreamAccumulator::default();
        let mut deltas = Vec::new();
        for line in lines {
            if let Some(event) = parse_sse_line(line) {
                if let Some(text) = acc.apply(event).unwrap() {
                    deltas.push(text);
                }
            }
        }
        (deltas, acc.finish())
    }

    #[test]
    fn test_new_requires_api_key() {
        assert!(matches!(
            ClaudeBackend::new(ClaudeConfig::default()),
            Err(LlmError::Configuration(_))
        ));
        assert!(ClaudeBackend::new(ClaudeConfig::new("test-key")).is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ClaudeConfig::new("test-key")
            .with_model("claude-haiku")
            .with_max_tokens(300)
            .with_endpoint("http://127.0.0.1:9999");

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.model, "claude-haiku");
        assert_eq!(config.max_tokens, 300);
        assert_eq!(config.endpoint, "http://127.0.0.1:9999");
    }

    #[test]
    fn test_request_serialization() {
        let backend = ClaudeBackend::new(ClaudeConfig::new("k")).unwrap();
        let request = MessageRequest {
            system: "Keep it short.".to_string(),
            messages: vec![Message::user("Hello")],
            tools: vec![ToolDefinition {
                name: "take_note".to_string(),
                description: "Save a note".to_string(),
                input_schema: json!({"type": "object"}),
            }],
            max_tokens: 0,
        };

        let value = serde_json::to_value(backend.build_request(&request, true)).unwrap();
        assert_eq!(value["max_tokens"], 500);
        assert_eq!(value["system"], "Keep it short.");
        assert_eq!(value["stream"], true);
        assert_eq!(value["messages"][0]["content"][0]["text"], "Hello");
        assert_eq!(value["tools"][0]["name"], "take_note");

        let bare = MessageRequest {
            messages: vec![Message::user("Hi")],
            max_tokens: 1024,
            ..Default::default()
        };
        let value = serde_json::to_value(backend.build_request(&bare, false)).unwrap();
        assert!(value.get("system").is_none());
        assert!(value.get("tools").is_none());
        assert_eq!(value["max_tokens"], 1024);
    }

    #[test]
    fn test_tool_use_response_parsing() {
        let json = r#"{
            "content": [
                {"type": "text", "text": "Let me check that."},
                {"type": "tool_use", "id": "toolu_123", "name": "search_notes", "input": {"query": "roof"}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 100, "output_tokens": 50}
        }"#;

        let response: ClaudeApiResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(response.content.len(), 2);
        assert_eq!(response.usage.output_tokens, 50);
    }

    #[test]
    fn test_stream_text_and_tool_use() {
        let (deltas, response) = accumulate(&[
            "event: message_start",
            r#"data: {"type":"message_start","message":{"usage":{"input_tokens":12}}}"#,
            "",
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Taking "}}"#,
            r#"data: {"type":"ping"}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"that note."}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_9","name":"take_note","input":{}}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"title\": \"Ro"}}"#,
            r#"data: {"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"of\", \"content\": \"leak\"}"}}"#,
            r#"data: {"type":"content_block_stop","index":1}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":40}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]);

        assert_eq!(deltas, vec!["Taking ", "that note."]);
        assert_eq!(response.text(), "Taking that note.");
        assert_eq!(response.stop_reason, StopReason::ToolUse);
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.output_tokens, 40);

        let calls = response.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_9");
        assert_eq!(calls[0].input, json!({"title": "Roof", "content": "leak"}));
    }

    #[test]
    fn test_stream_tool_without_input() {
        let (_, response) = accumulate(&[
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t","name":"status","input":{}}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
        ]);
        assert_eq!(response.tool_calls()[0].input, json!({}));
    }

    #[test]
    fn test_stream_error_event() {
        let mut acc = StreamAccumulator::default();
        let event = parse_sse_line(
            r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap();
        assert!(matches!(acc.apply(event), Err(LlmError::Api(m)) if m == "Overloaded"));
    }
}
