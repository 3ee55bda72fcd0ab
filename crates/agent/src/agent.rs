//! Voice agent
//!
//! Runs a bounded reasoning loop: the model may request tools, the tools
//! run, their results go back, and the loop repeats until the model answers
//! in text or the round budget runs out. Tool failures become error results
//! for the model to explain; they never leave the loop.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use voice_gateway_config::AgentSettings;
use voice_gateway_llm::{
    ContentBlock, LlmBackend, LlmError, Message, MessageRequest, MessageResponse, StopReason,
    ToolCall, ToolDefinition,
};
use voice_gateway_pipeline::SentenceSplitter;
use voice_gateway_tools::{ToolError, ToolRegistry};

use crate::prompt::{build_system_prompt, PromptSource};
use crate::AgentError;

pub const ENGINE_ERROR_REPLY: &str =
    "Sorry, I'm having trouble connecting to my brain right now. Try again in a moment.";
pub const ROUNDS_EXHAUSTED_REPLY: &str =
    "I've been working on that for a while. Let me know if you need anything else.";
pub const EMPTY_REPLY: &str = "Done.";

const LOG_PREVIEW_CHARS: usize = 200;

/// Agent limits
#[derive(Debug, Clone)]
pub struct VoiceAgentConfig {
    /// Tool rounds before giving up with a fallback reply
    pub max_tool_rounds: u32,
    /// Default response budget
    pub max_tokens: u32,
}

impl Default for VoiceAgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: voice_gateway_config::constants::agent::MAX_TOOL_ROUNDS,
            max_tokens: voice_gateway_config::constants::agent::MAX_TOKENS,
        }
    }
}

impl VoiceAgentConfig {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            max_tool_rounds: settings.max_tool_rounds,
            max_tokens: settings.max_tokens,
        }
    }
}

/// Per-request options
#[derive(Debug, Clone)]
pub struct RespondOptions {
    pub source: PromptSource,
    pub style_hint: Option<String>,
    /// Overrides the configured response budget
    pub max_tokens: Option<u32>,
    /// Receives each tool name before it runs
    pub tool_events: Option<mpsc::UnboundedSender<String>>,
}

impl RespondOptions {
    pub fn new(source: PromptSource) -> Self {
        Self {
            source,
            style_hint: None,
            max_tokens: None,
            tool_events: None,
        }
    }

    pub fn with_style_hint(mut self, hint: Option<&str>) -> Self {
        self.style_hint = hint.map(str::to_string);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tool_events(mut self, events: mpsc::UnboundedSender<String>) -> Self {
        self.tool_events = Some(events);
        self
    }
}

/// Awaited before a round's tools run. Returning `false` abandons the
/// response.
#[async_trait]
pub trait ToolGate: Send + Sync {
    async fn permit(&self) -> bool;
}

/// Where streamed sentences go, and what can stop them
struct Streaming<'a> {
    sentences: &'a mpsc::Sender<String>,
    cancel: &'a CancellationToken,
    gate: Option<&'a dyn ToolGate>,
}

/// Reasoning engine plus tools
pub struct VoiceAgent {
    backend: Arc<dyn LlmBackend>,
    tools: Arc<ToolRegistry>,
    config: VoiceAgentConfig,
}

impl VoiceAgent {
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        tools: Arc<ToolRegistry>,
        config: VoiceAgentConfig,
    ) -> Self {
        tracing::info!(
            model = backend.model_name(),
            tools = tools.len(),
            max_tool_rounds = config.max_tool_rounds,
            "Voice agent ready"
        );
        Self {
            backend,
            tools,
            config,
        }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub fn config(&self) -> &VoiceAgentConfig {
        &self.config
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .schemas()
            .into_iter()
            .map(|s| ToolDefinition {
                name: s.name,
                description: s.description,
                input_schema: s.input_schema,
            })
            .collect()
    }

    /// Final reply text for a conversation. Never fails: engine errors and
    /// an exhausted round budget produce fixed spoken replies.
    pub async fn respond(&self, messages: Vec<Message>, options: &RespondOptions) -> String {
        match self.run(messages, options, None).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "Agent run failed");
                ENGINE_ERROR_REPLY.to_string()
            }
        }
    }

    /// Like [`Self::respond`], but sends each sentence to `sentences` as the
    /// model produces it. Returns the final reply text, or
    /// [`AgentError::Cancelled`] once `cancel` fires or the gate refuses.
    pub async fn respond_streaming(
        &self,
        messages: Vec<Message>,
        options: &RespondOptions,
        sentences: mpsc::Sender<String>,
        cancel: &CancellationToken,
        gate: Option<&dyn ToolGate>,
    ) -> Result<String, AgentError> {
        let streaming = Streaming {
            sentences: &sentences,
            cancel,
            gate,
        };
        self.run(messages, options, Some(streaming)).await
    }

    async fn run(
        &self,
        messages: Vec<Message>,
        options: &RespondOptions,
        streaming: Option<Streaming<'_>>,
    ) -> Result<String, AgentError> {
        let system = build_system_prompt(options.source, options.style_hint.as_deref());
        let tools = self.tool_definitions();
        let max_tokens = options.max_tokens.unwrap_or(self.config.max_tokens);

        let mut current = messages;
        let mut splitter = SentenceSplitter::default();

        for round in 1..=self.config.max_tool_rounds {
            if streaming.as_ref().is_some_and(|s| s.cancel.is_cancelled()) {
                return Err(AgentError::Cancelled);
            }

            let request = MessageRequest {
                system: system.clone(),
                messages: current.clone(),
                tools: tools.clone(),
                max_tokens,
            };

            let started = Instant::now();
            let result = match &streaming {
                Some(s) => self.stream_round(&request, s, &mut splitter).await?,
                None => self.backend.create_message(&request, None).await,
            };
            metrics::histogram!("voice_llm_latency_ms")
                .record(started.elapsed().as_millis() as f64);

            let response = match result {
                Ok(response) => response,
                Err(e) => return Ok(self.engine_failed(e, &streaming).await),
            };

            tracing::debug!(
                round,
                source = options.source.as_str(),
                stop_reason = ?response.stop_reason,
                input_tokens = response.usage.input_tokens,
                output_tokens = response.usage.output_tokens,
                "Model turn"
            );

            let text = response.text();
            let calls = response.tool_calls();
            if calls.is_empty() {
                return Ok(finish_text(text, &streaming, splitter.emitted() > 0).await);
            }

            if let Some(s) = &streaming {
                if let Some(gate) = s.gate {
                    let permitted = tokio::select! {
                        _ = s.cancel.cancelled() => false,
                        permitted = gate.permit() => permitted,
                    };
                    if !permitted {
                        return Err(AgentError::Cancelled);
                    }
                }
            }

            let mut results = Vec::with_capacity(calls.len());
            for call in &calls {
                if let Some(events) = &options.tool_events {
                    let _ = events.send(call.name.clone());
                }
                if let Some(s) = &streaming {
                    results.push(tokio::select! {
                        _ = s.cancel.cancelled() => return Err(AgentError::Cancelled),
                        result = self.execute_tool(call) => result,
                    });
                } else {
                    results.push(self.execute_tool(call).await);
                }
            }

            let MessageResponse {
                content,
                stop_reason,
                ..
            } = response;
            current.push(Message::assistant_blocks(content));
            current.push(Message::tool_results(results));

            if stop_reason == StopReason::EndTurn {
                return Ok(finish_text(text, &streaming, splitter.emitted() > 0).await);
            }
        }

        tracing::warn!(
            rounds = self.config.max_tool_rounds,
            "Tool round budget exhausted"
        );
        if let Some(s) = &streaming {
            let _ = s.sentences.send(ROUNDS_EXHAUSTED_REPLY.to_string()).await;
        }
        Ok(ROUNDS_EXHAUSTED_REPLY.to_string())
    }

    /// One streamed model turn. Sentences go out while deltas arrive; the
    /// round's leftover text is flushed when the turn completes.
    async fn stream_round(
        &self,
        request: &MessageRequest,
        streaming: &Streaming<'_>,
        splitter: &mut SentenceSplitter,
    ) -> Result<Result<MessageResponse, LlmError>, AgentError> {
        let (delta_tx, mut delta_rx) = mpsc::channel::<String>(64);
        let sentences = streaming.sentences;

        let call = self.backend.create_message(request, Some(delta_tx));
        let pump = async {
            while let Some(delta) = delta_rx.recv().await {
                for sentence in splitter.push(&delta) {
                    let _ = sentences.send(sentence).await;
                }
            }
            if let Some(rest) = splitter.finish() {
                let _ = sentences.send(rest).await;
            }
        };

        tokio::select! {
            _ = streaming.cancel.cancelled() => Err(AgentError::Cancelled),
            (result, ()) = async { tokio::join!(call, pump) } => Ok(result),
        }
    }

    async fn engine_failed(&self, error: LlmError, streaming: &Option<Streaming<'_>>) -> String {
        metrics::counter!("voice_errors_total", "component" => "llm").increment(1);
        tracing::error!(
            error = %error,
            model = self.backend.model_name(),
            "Reasoning engine error"
        );
        if let Some(s) = streaming {
            let _ = s.sentences.send(ENGINE_ERROR_REPLY.to_string()).await;
        }
        ENGINE_ERROR_REPLY.to_string()
    }

    async fn execute_tool(&self, call: &ToolCall) -> ContentBlock {
        tracing::info!(
            tool = %call.name,
            input = %preview(&call.input.to_string()),
            "Tool call"
        );

        let started = Instant::now();
        let (content, is_error, outcome) =
            match self.tools.execute(&call.name, call.input.clone()).await {
                Ok(output) => (output, false, "ok"),
                Err(ToolError::NotFound(_)) => {
                    (format!("Unknown tool: {}", call.name), true, "unknown")
                }
                Err(e) => (format!("Error: {}", e), true, "error"),
            };

        metrics::counter!(
            "voice_tool_calls_total",
            "tool" => call.name.clone(),
            "outcome" => outcome
        )
        .increment(1);
        tracing::info!(
            tool = %call.name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            is_error,
            result = %preview(&content),
            "Tool result"
        );

        ContentBlock::ToolResult {
            tool_use_id: call.id.clone(),
            content,
            is_error,
        }
    }
}

/// Final text, or the empty-reply stand-in (spoken if nothing else was)
async fn finish_text(text: String, streaming: &Option<Streaming<'_>>, spoken: bool) -> String {
    if !text.is_empty() {
        return text;
    }
    if let Some(s) = streaming {
        if !spoken {
            let _ = s.sentences.send(EMPTY_REPLY.to_string()).await;
        }
    }
    EMPTY_REPLY.to_string()
}

fn preview(text: &str) -> String {
    text.chars().take(LOG_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use voice_gateway_llm::Usage;
    use voice_gateway_tools::{Tool, ToolSchema};

    fn text_response(text: &str) -> MessageResponse {
        MessageResponse {
            content: vec![ContentBlock::Text {
                text: text.to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        }
    }

    fn tool_response(name: &str) -> MessageResponse {
        MessageResponse {
            content: vec![
                ContentBlock::Text {
                    text: "Let me check that.".to_string(),
                },
                ContentBlock::ToolUse {
                    id: "toolu_1".to_string(),
                    name: name.to_string(),
                    input: json!({"query": "roof"}),
                },
            ],
            stop_reason: StopReason::ToolUse,
            usage: Usage::default(),
        }
    }

    /// Replays scripted responses, streaming text blocks as deltas
    #[derive(Default)]
    struct ScriptedBackend {
        script: Mutex<VecDeque<Result<MessageResponse, LlmError>>>,
        requests: Mutex<Vec<MessageRequest>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<MessageResponse, LlmError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Mutex::default(),
            }
        }
    }

    #[async_trait]
    impl LlmBackend for ScriptedBackend {
        async fn create_message(
            &self,
            request: &MessageRequest,
            deltas: Option<mpsc::Sender<String>>,
        ) -> Result<MessageResponse, LlmError> {
            self.requests.lock().push(request.clone());
            let next = self
                .script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(text_response("out of script")));
            if let (Some(tx), Ok(response)) = (deltas, next.as_ref()) {
                for word in response.text().split_inclusive(' ') {
                    let _ = tx.send(word.to_string()).await;
                }
            }
            next
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    /// Asks for a tool on every turn
    #[derive(Default)]
    struct ToolHungryBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmBackend for ToolHungryBackend {
        async fn create_message(
            &self,
            _request: &MessageRequest,
            _deltas: Option<mpsc::Sender<String>>,
        ) -> Result<MessageResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(tool_response("lookup"))
        }

        fn model_name(&self) -> &str {
            "tool-hungry"
        }
    }

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails"
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: "broken".to_string(),
                description: "Always fails".to_string(),
                input_schema: json!({"type": "object", "properties": {}}),
            }
        }

        async fn execute(&self, _input: Value) -> Result<String, ToolError> {
            Err(ToolError::execution("disk on fire"))
        }
    }

    fn agent(backend: Arc<dyn LlmBackend>) -> VoiceAgent {
        let mut registry = ToolRegistry::new();
        registry.register(BrokenTool);
        VoiceAgent::new(backend, Arc::new(registry), VoiceAgentConfig::default())
    }

    fn tool_result_of(request: &MessageRequest) -> (String, bool) {
        let last = request.messages.last().expect("tool results message");
        match &last.content[0] {
            ContentBlock::ToolResult {
                content, is_error, ..
            } => (content.clone(), *is_error),
            other => panic!("expected tool result, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_plain_reply() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(text_response("Hi there."))]));
        let agent = agent(backend.clone());
        let reply = agent
            .respond(vec![Message::user("hello")], &RespondOptions::new(PromptSource::Phone))
            .await;
        assert_eq!(reply, "Hi there.");

        let requests = backend.requests.lock();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].system.contains("live phone call"));
        assert_eq!(requests[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(tool_response("broken")),
            Ok(tool_response("missing")),
            Ok(text_response("The disk is having trouble.")),
        ]));
        let agent = agent(backend.clone());
        let reply = agent
            .respond(vec![Message::user("check it")], &RespondOptions::new(PromptSource::Sms))
            .await;
        assert_eq!(reply, "The disk is having trouble.");

        let requests = backend.requests.lock();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            tool_result_of(&requests[1]),
            ("Error: disk on fire".to_string(), true)
        );
        assert_eq!(
            tool_result_of(&requests[2]),
            ("Unknown tool: missing".to_string(), true)
        );
        // user, assistant(tool_use), user(tool_result), assistant, user
        assert_eq!(requests[2].messages.len(), 5);
    }

    #[tokio::test]
    async fn test_tool_events_name_each_call() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Ok(tool_response("broken")),
            Ok(tool_response("missing")),
            Ok(text_response("Done checking.")),
        ]));
        let agent = agent(backend);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let options = RespondOptions::new(PromptSource::App).with_tool_events(tx);

        let reply = agent.respond(vec![Message::user("check it")], &options).await;
        assert_eq!(reply, "Done checking.");
        assert_eq!(rx.try_recv().unwrap(), "broken");
        assert_eq!(rx.try_recv().unwrap(), "missing");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_round_budget_bounds_the_loop() {
        let backend = Arc::new(ToolHungryBackend::default());
        let agent = agent(backend.clone());
        let reply = agent
            .respond(vec![Message::user("loop")], &RespondOptions::new(PromptSource::Phone))
            .await;
        assert_eq!(reply, ROUNDS_EXHAUSTED_REPLY);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_engine_error_reply() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(LlmError::Api(
            "overloaded".to_string(),
        ))]));
        let agent = agent(backend);
        let (tx, mut rx) = mpsc::channel(8);
        let reply = agent
            .respond_streaming(
                vec![Message::user("hello")],
                &RespondOptions::new(PromptSource::Phone),
                tx,
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, ENGINE_ERROR_REPLY);
        assert_eq!(rx.recv().await.as_deref(), Some(ENGINE_ERROR_REPLY));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_streaming_preserves_text_and_order() {
        let full = "Sure thing, the forecast looks clear. Expect sun all afternoon!";
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(text_response(full))]));
        let agent = agent(backend);
        let (tx, mut rx) = mpsc::channel(16);

        let reply = agent
            .respond_streaming(
                vec![Message::user("weather?")],
                &RespondOptions::new(PromptSource::Phone),
                tx,
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, full);

        let mut spoken = Vec::new();
        while let Some(sentence) = rx.recv().await {
            spoken.push(sentence);
        }
        assert!(spoken.len() >= 2);
        assert_eq!(spoken.last().map(String::as_str), Some("Expect sun all afternoon!"));
        assert_eq!(spoken.join(" "), full);
    }

    #[tokio::test]
    async fn test_empty_reply_is_spoken_as_done() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(text_response(""))]));
        let agent = agent(backend);
        let (tx, mut rx) = mpsc::channel(4);
        let reply = agent
            .respond_streaming(
                vec![Message::user("do it")],
                &RespondOptions::new(PromptSource::Phone),
                tx,
                &CancellationToken::new(),
                None,
            )
            .await
            .unwrap();
        assert_eq!(reply, EMPTY_REPLY);
        assert_eq!(rx.recv().await.as_deref(), Some(EMPTY_REPLY));
    }

    struct Refuse;

    #[async_trait]
    impl ToolGate for Refuse {
        async fn permit(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_gate_refusal_skips_tools() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(tool_response("broken"))]));
        let agent = agent(backend.clone());
        let (tx, _rx) = mpsc::channel(8);
        let result = agent
            .respond_streaming(
                vec![Message::user("check")],
                &RespondOptions::new(PromptSource::Phone),
                tx,
                &CancellationToken::new(),
                Some(&Refuse),
            )
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert_eq!(backend.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(text_response("never"))]));
        let agent = agent(backend.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (tx, _rx) = mpsc::channel(8);
        let result = agent
            .respond_streaming(
                vec![Message::user("hi")],
                &RespondOptions::new(PromptSource::Phone),
                tx,
                &cancel,
                None,
            )
            .await;
        assert!(matches!(result, Err(AgentError::Cancelled)));
        assert!(backend.requests.lock().is_empty());
    }
}
