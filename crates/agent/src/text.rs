//! Text conversations: SMS threads, the demo endpoint and app turns

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use voice_gateway_config::AgentSettings;
use voice_gateway_core::{unix_timestamp, EventPublisher, Role, SessionEvent, SessionSource};
use voice_gateway_llm::Message;
use voice_gateway_persistence::ConversationStore;

use crate::agent::{RespondOptions, VoiceAgent};
use crate::prompt::PromptSource;
use crate::session::ConversationSession;
use crate::sms::{EntityQuery, SmsCommand, SmsThread, EMPTY_BODY_REPLY, ERROR_REPLY, RESET_REPLY};
use crate::AgentError;

/// Identifier of the single demo session
pub const DEMO_IDENTIFIER: &str = "demo-user";

/// App session identifier when the client sends no token
pub const APP_DEFAULT_IDENTIFIER: &str = "app-default";

/// Event payloads are clipped to this many characters
const EVENT_TEXT_CHARS: usize = 500;

/// Answers SMS messages and demo text through the agent
pub struct TextResponder {
    agent: Arc<VoiceAgent>,
    store: Arc<dyn ConversationStore>,
    publisher: Arc<dyn EventPublisher>,
    context_messages: usize,
    max_tokens_sms: u32,
    /// SMS mode and entity per session id
    threads: Mutex<HashMap<String, SmsThread>>,
}

impl TextResponder {
    pub fn new(
        agent: Arc<VoiceAgent>,
        store: Arc<dyn ConversationStore>,
        publisher: Arc<dyn EventPublisher>,
        settings: &AgentSettings,
    ) -> Self {
        Self {
            agent,
            store,
            publisher,
            context_messages: settings.context_messages,
            max_tokens_sms: settings.max_tokens_sms,
            threads: Mutex::new(HashMap::new()),
        }
    }

    /// Reply to one SMS. Always produces reply text.
    pub async fn sms_reply(&self, from: &str, body: &str) -> String {
        let body = body.trim();
        if body.is_empty() {
            return EMPTY_BODY_REPLY.to_string();
        }

        match self.handle_sms(from, body).await {
            Ok(reply) => reply,
            Err(e) => {
                metrics::counter!("voice_errors_total", "component" => "sms").increment(1);
                tracing::error!(from = %from, error = %e, "SMS handling failed");
                ERROR_REPLY.to_string()
            }
        }
    }

    async fn handle_sms(&self, from: &str, body: &str) -> Result<String, AgentError> {
        let mut session: ConversationSession =
            self.store.get_or_create(from, SessionSource::Sms).await?.into();
        let mut thread = self
            .threads
            .lock()
            .get(session.id())
            .cloned()
            .unwrap_or_default();

        let query = match SmsCommand::parse(body) {
            SmsCommand::Help => return Ok(thread.help_reply()),
            SmsCommand::Reset => {
                thread.reset();
                self.threads.lock().insert(session.id().to_string(), thread);
                return Ok(RESET_REPLY.to_string());
            }
            SmsCommand::Switch { mode, rest } => {
                tracing::info!(from = %from, mode = mode.as_str(), "SMS mode switch");
                thread.mode = mode;
                rest
            }
            SmsCommand::Query(text) => text,
        };

        let resolved = thread.resolve(&query);
        self.threads
            .lock()
            .insert(session.id().to_string(), thread.clone());
        let question = match resolved {
            EntityQuery::Ask(question) => question,
            EntityQuery::NeedEntity(prompt) => return Ok(prompt),
        };

        self.store
            .save_message(session.id(), Role::User, body)
            .await?;
        session.push(Role::User, body);

        let mut messages = session.context_messages(self.context_messages);
        if question != body {
            // Ask with the entity-enriched text; history keeps what was sent
            messages.pop();
            messages.push(Message::user(question));
        }

        let mut options = RespondOptions::new(if thread.mode.is_general() {
            PromptSource::Sms
        } else {
            PromptSource::SmsEntity(thread.mode)
        });
        if !thread.mode.is_general() {
            options = options.with_max_tokens(self.max_tokens_sms);
        }

        let reply = self.agent.respond(messages, &options).await;
        self.store
            .save_message(session.id(), Role::Assistant, &reply)
            .await?;

        tracing::info!(
            from = %from,
            mode = thread.mode.as_str(),
            reply = %clip(&reply, 200),
            "SMS reply"
        );
        self.publisher.publish(SessionEvent::SmsReceived {
            from: from.to_string(),
            body: clip(body, EVENT_TEXT_CHARS),
            reply: clip(&reply, EVENT_TEXT_CHARS),
            mode: thread.mode.as_str().to_string(),
            last_entity: thread.last_entity.clone(),
            timestamp: unix_timestamp(),
        });

        Ok(reply)
    }

    /// Reply on the shared demo session
    pub async fn demo_reply(&self, text: &str) -> Result<String, AgentError> {
        let mut session: ConversationSession = self
            .store
            .get_or_create(DEMO_IDENTIFIER, SessionSource::Demo)
            .await?
            .into();

        self.store
            .save_message(session.id(), Role::User, text)
            .await?;
        session.push(Role::User, text);

        let reply = self
            .agent
            .respond(
                session.context_messages(self.context_messages),
                &RespondOptions::new(PromptSource::Demo),
            )
            .await;
        self.store
            .save_message(session.id(), Role::Assistant, &reply)
            .await?;
        Ok(reply)
    }

    /// Load or create the app session for a client token
    pub async fn app_session(&self, token: &str) -> Result<ConversationSession, AgentError> {
        let identifier = if token.is_empty() {
            APP_DEFAULT_IDENTIFIER
        } else {
            token
        };
        Ok(self
            .store
            .get_or_create(identifier, SessionSource::App)
            .await?
            .into())
    }

    /// One app turn. Tool names go to `tool_events` as the agent calls them.
    pub async fn app_reply(
        &self,
        session: &mut ConversationSession,
        text: &str,
        tool_events: Option<mpsc::UnboundedSender<String>>,
    ) -> Result<String, AgentError> {
        self.store
            .save_message(session.id(), Role::User, text)
            .await?;
        session.push(Role::User, text);

        let mut options = RespondOptions::new(PromptSource::App);
        if let Some(events) = tool_events {
            options = options.with_tool_events(events);
        }
        let reply = self
            .agent
            .respond(session.context_messages(self.context_messages), &options)
            .await;

        self.store
            .save_message(session.id(), Role::Assistant, &reply)
            .await?;
        session.push(Role::Assistant, &reply);
        tracing::info!(session_id = %session.id(), reply = %clip(&reply, 200), "App reply");
        Ok(reply)
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use voice_gateway_llm::{DemoBackend, LlmBackend, LlmError, MessageRequest, MessageResponse};
    use voice_gateway_persistence::InMemoryConversationStore;
    use voice_gateway_tools::ToolRegistry;

    use crate::agent::VoiceAgentConfig;

    #[derive(Default)]
    struct RecordingPublisher {
        events: Mutex<Vec<SessionEvent>>,
    }

    impl EventPublisher for RecordingPublisher {
        fn publish(&self, event: SessionEvent) {
            self.events.lock().push(event);
        }
    }

    /// Echoes the last user text and the system prompt's first addendum line
    #[derive(Default)]
    struct EchoBackend {
        requests: Mutex<Vec<MessageRequest>>,
    }

    #[async_trait]
    impl LlmBackend for EchoBackend {
        async fn create_message(
            &self,
            request: &MessageRequest,
            _deltas: Option<mpsc::Sender<String>>,
        ) -> Result<MessageResponse, LlmError> {
            self.requests.lock().push(request.clone());
            let last = request.messages.last().map(|m| m.text()).unwrap_or_default();
            Ok(MessageResponse {
                content: vec![voice_gateway_llm::ContentBlock::Text {
                    text: format!("echo: {}", last),
                }],
                stop_reason: voice_gateway_llm::StopReason::EndTurn,
                usage: Default::default(),
            })
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    fn responder(
        backend: Arc<dyn LlmBackend>,
    ) -> (TextResponder, Arc<InMemoryConversationStore>, Arc<RecordingPublisher>) {
        let store = Arc::new(InMemoryConversationStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let agent = Arc::new(VoiceAgent::new(
            backend,
            Arc::new(ToolRegistry::new()),
            VoiceAgentConfig::default(),
        ));
        let responder = TextResponder::new(
            agent,
            store.clone(),
            publisher.clone(),
            &AgentSettings::default(),
        );
        (responder, store, publisher)
    }

    #[tokio::test]
    async fn test_sms_entity_mode_flow() {
        let backend = Arc::new(EchoBackend::default());
        let (responder, store, publisher) = responder(backend.clone());
        let from = "+15550001111";

        assert_eq!(
            responder.sms_reply(from, "n:").await,
            "[N] Mode set to node. Send an entity to query."
        );
        assert_eq!(
            responder.sms_reply(from, "n: north pump station").await,
            "echo: north pump station"
        );
        assert_eq!(
            responder.sms_reply(from, "flow rate").await,
            "echo: flow rate (regarding: north pump station)"
        );

        {
            let requests = backend.requests.lock();
            assert_eq!(requests.len(), 2);
            assert!(requests[1].system.contains("SMS node mode"));
            assert_eq!(requests[1].max_tokens, 300);
        }

        assert!(responder.sms_reply(from, "?").await.ends_with("Current: node"));
        assert_eq!(responder.sms_reply(from, "x").await, RESET_REPLY);
        assert!(responder.sms_reply(from, "help").await.ends_with("Current: general"));

        // History keeps the raw bodies
        let loaded = store.get_or_create(from, SessionSource::Sms).await.unwrap();
        let contents: Vec<&str> = loaded.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents[0], "n: north pump station");
        assert_eq!(contents[2], "flow rate");

        let events = publisher.events.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            SessionEvent::SmsReceived { mode, last_entity, .. }
                if mode == "node" && last_entity == "north pump station"
        ));
    }

    #[tokio::test]
    async fn test_empty_sms() {
        let (responder, _, _) = responder(Arc::new(EchoBackend::default()));
        assert_eq!(responder.sms_reply("+1555", "   ").await, EMPTY_BODY_REPLY);
    }

    #[tokio::test]
    async fn test_demo_reply_keeps_history() {
        let (responder, store, _) = responder(Arc::new(DemoBackend::new()));
        let reply = responder.demo_reply("hello there").await.unwrap();
        assert!(reply.contains("demo mode"));

        let loaded = store
            .get_or_create(DEMO_IDENTIFIER, SessionSource::Demo)
            .await
            .unwrap();
        assert_eq!(loaded.history.len(), 2);
        assert_eq!(loaded.history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_app_turns_share_the_token_session() {
        let backend = Arc::new(EchoBackend::default());
        let (responder, store, _) = responder(backend.clone());

        let mut session = responder.app_session("tok-1").await.unwrap();
        let reply = responder
            .app_reply(&mut session, "what's on today", None)
            .await
            .unwrap();
        assert_eq!(reply, "echo: what's on today");
        assert_eq!(session.message_count(), 2);
        assert!(backend.requests.lock()[0].system.contains("companion app"));

        let resumed = responder.app_session("tok-1").await.unwrap();
        assert_eq!(resumed.id(), session.id());
        assert_eq!(resumed.message_count(), 2);

        let anonymous = responder.app_session("").await.unwrap();
        assert_ne!(anonymous.id(), session.id());
        let loaded = store
            .get_or_create(APP_DEFAULT_IDENTIFIER, SessionSource::App)
            .await
            .unwrap();
        assert_eq!(loaded.record.id, anonymous.id());
    }
}
