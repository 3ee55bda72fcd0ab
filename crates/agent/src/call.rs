//! Phone call conversation
//!
//! Answers committed turns for one call. Speculative turns may stream a
//! reply but change nothing (no mode switch, no tool run, no history write)
//! until the turn is confirmed.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use voice_gateway_config::AgentSettings;
use voice_gateway_core::{
    unix_timestamp, CallMode, EventPublisher, Role, SessionEvent,
};
use voice_gateway_llm::Message;
use voice_gateway_persistence::ConversationStore;
use voice_gateway_pipeline::{PipelineError, ResponseSpeaker, TurnHandler};

use crate::agent::{RespondOptions, ToolGate, VoiceAgent};
use crate::modes::{self, BRIEFING_CLOSE_PROMPT, EMPTY_MINUTES_PROMPT};
use crate::prompt::PromptSource;
use crate::session::ConversationSession;

const SENTENCE_QUEUE: usize = 32;
const INTERRUPTED_SUMMARY: &str = "(summary interrupted)";

#[async_trait]
impl ToolGate for ResponseSpeaker {
    async fn permit(&self) -> bool {
        self.confirmed().await
    }
}

/// Call conversation limits
#[derive(Debug, Clone)]
pub struct CallConversationConfig {
    pub context_messages: usize,
    pub max_tokens_briefing: u32,
}

impl CallConversationConfig {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        Self {
            context_messages: settings.context_messages,
            max_tokens_briefing: settings.max_tokens_briefing,
        }
    }
}

impl Default for CallConversationConfig {
    fn default() -> Self {
        Self::from_settings(&AgentSettings::default())
    }
}

/// Turn handler for one phone call
pub struct CallConversation {
    session_id: String,
    agent: Arc<VoiceAgent>,
    store: Arc<dyn ConversationStore>,
    publisher: Arc<dyn EventPublisher>,
    session: Mutex<ConversationSession>,
    config: CallConversationConfig,
}

impl CallConversation {
    pub fn new(
        session: ConversationSession,
        agent: Arc<VoiceAgent>,
        store: Arc<dyn ConversationStore>,
        publisher: Arc<dyn EventPublisher>,
        config: CallConversationConfig,
    ) -> Self {
        Self {
            session_id: session.id().to_string(),
            agent,
            store,
            publisher,
            session: Mutex::new(session),
            config,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn message_count(&self) -> usize {
        self.session.lock().await.message_count()
    }

    pub async fn mode(&self) -> CallMode {
        self.session.lock().await.mode
    }

    fn publish(&self, event: SessionEvent) {
        tracing::debug!(
            session_id = %self.session_id,
            event = event.name(),
            "Publishing session event"
        );
        self.publisher.publish(event);
    }

    /// Stream the agent's reply into the speaker
    async fn speak(
        &self,
        messages: Vec<Message>,
        options: &RespondOptions,
        speaker: &ResponseSpeaker,
    ) -> Result<String, PipelineError> {
        let (tx, rx) = mpsc::channel(SENTENCE_QUEUE);
        let cancel = speaker.cancellation();

        let (reply, spoken) = tokio::join!(
            self.agent.respond_streaming(
                messages,
                options,
                tx,
                &cancel,
                Some(speaker as &dyn ToolGate),
            ),
            speaker.speak(rx),
        );

        let reply = reply?;
        match spoken {
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Reply was not spoken");
            }
            Ok(()) => {}
        }
        Ok(reply)
    }

    async fn save(&self, session: &mut ConversationSession, role: Role, content: &str) {
        if let Err(e) = self.store.save_message(&self.session_id, role, content).await {
            metrics::counter!("voice_errors_total", "component" => "persistence").increment(1);
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to save message");
        }
        session.push(role, content);
    }

    /// Persist a finished turn once it is confirmed. A confirmed turn that
    /// was cut off keeps the caller's words but no reply.
    async fn finish_turn(
        &self,
        session: &mut ConversationSession,
        user_text: &str,
        reply: Result<String, PipelineError>,
        speaker: &ResponseSpeaker,
    ) -> Result<(), PipelineError> {
        match reply {
            Ok(reply) => {
                if !speaker.confirmed().await {
                    return Err(PipelineError::Cancelled);
                }
                self.save(session, Role::User, user_text).await;
                if !reply.is_empty() {
                    self.save(session, Role::Assistant, &reply).await;
                }
                tracing::info!(
                    session_id = %self.session_id,
                    mode = session.mode.as_str(),
                    reply = %reply.chars().take(200).collect::<String>(),
                    "Turn answered"
                );
                Ok(())
            }
            Err(e) => {
                if speaker.is_confirmed() {
                    self.save(session, Role::User, user_text).await;
                }
                Err(e)
            }
        }
    }

    fn context_with(&self, session: &ConversationSession, user: String) -> Vec<Message> {
        let mut messages = session.context_messages(self.config.context_messages.saturating_sub(1));
        messages.push(Message::user(user));
        messages
    }

    async fn on_minutes_turn(
        &self,
        session: &mut ConversationSession,
        text: &str,
        lower: &str,
        speaker: &ResponseSpeaker,
    ) -> Result<(), PipelineError> {
        if !speaker.confirmed().await {
            return Err(PipelineError::Cancelled);
        }
        if modes::is_minutes_stop(lower) {
            return self.finish_minutes(session, text, speaker).await;
        }
        if let Some(minutes) = session.minutes.as_mut() {
            let entry = minutes.record(text);
            tracing::info!(session_id = %self.session_id, entry = %entry.line(), "Minutes entry");
        }
        Ok(())
    }

    async fn finish_minutes(
        &self,
        session: &mut ConversationSession,
        exit_text: &str,
        speaker: &ResponseSpeaker,
    ) -> Result<(), PipelineError> {
        let Some(minutes) = session.finish_minutes() else {
            return Ok(());
        };
        let duration = minutes.elapsed();
        tracing::info!(
            session_id = %self.session_id,
            entries = minutes.entries.len(),
            duration_secs = duration.as_secs(),
            "Minutes ended"
        );
        self.publish(SessionEvent::MinutesEnd {
            session_id: self.session_id.clone(),
            entries: minutes.entries.len(),
            duration_seconds: duration.as_secs(),
            timestamp: unix_timestamp(),
        });

        let options = RespondOptions::new(PromptSource::Phone);
        if minutes.is_empty() {
            let reply = self
                .speak(vec![Message::user(EMPTY_MINUTES_PROMPT)], &options, speaker)
                .await;
            return self.finish_turn(session, exit_text, reply, speaker).await;
        }

        let reply = self
            .speak(
                vec![Message::user(minutes.summary_request(duration))],
                &options,
                speaker,
            )
            .await;
        let summary = match &reply {
            Ok(summary) if !summary.is_empty() => summary.clone(),
            _ => INTERRUPTED_SUMMARY.to_string(),
        };

        // The transcript is kept even when the summary is cut off
        let (title, body) = minutes.note(&summary, duration, chrono::Local::now().naive_local());
        match self
            .store
            .save_note(&title, &body, Some(&self.session_id))
            .await
        {
            Ok(_) => {
                tracing::info!(session_id = %self.session_id, title = %title, "Minutes saved as note")
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Failed to save minutes")
            }
        }

        self.finish_turn(session, exit_text, reply, speaker).await
    }

    async fn on_briefing_turn(
        &self,
        session: &mut ConversationSession,
        text: &str,
        lower: &str,
        speaker: &ResponseSpeaker,
    ) -> Result<(), PipelineError> {
        let exiting = modes::is_briefing_stop(lower)
            || session
                .briefing
                .as_ref()
                .is_some_and(|b| b.should_auto_exit(lower));
        if exiting {
            if !speaker.confirmed().await {
                return Err(PipelineError::Cancelled);
            }
            return self.finish_briefing(session, text, speaker).await;
        }

        let options = RespondOptions::new(PromptSource::PhoneBriefing)
            .with_max_tokens(self.config.max_tokens_briefing);
        let messages = self.context_with(session, text.to_string());
        let reply = self.speak(messages, &options, speaker).await;

        if reply.is_ok() && speaker.is_confirmed() {
            if let Some(briefing) = session.briefing.as_mut() {
                briefing.turn_count += 1;
            }
            session.profile.update(text);
        }
        self.finish_turn(session, text, reply, speaker).await
    }

    async fn finish_briefing(
        &self,
        session: &mut ConversationSession,
        exit_text: &str,
        speaker: &ResponseSpeaker,
    ) -> Result<(), PipelineError> {
        let Some(briefing) = session.finish_briefing() else {
            return Ok(());
        };
        let duration = briefing.elapsed();
        tracing::info!(
            session_id = %self.session_id,
            topic = %briefing.topic,
            turns = briefing.turn_count,
            duration_secs = duration.as_secs(),
            "Briefing ended"
        );
        self.publish(SessionEvent::BriefingEnd {
            session_id: self.session_id.clone(),
            topic: briefing.topic.clone(),
            turn_count: briefing.turn_count,
            duration_seconds: duration.as_secs(),
            timestamp: unix_timestamp(),
        });

        let reply = self
            .speak(
                vec![Message::user(BRIEFING_CLOSE_PROMPT)],
                &RespondOptions::new(PromptSource::Phone),
                speaker,
            )
            .await;
        self.finish_turn(session, exit_text, reply, speaker).await
    }

    async fn start_briefing(
        &self,
        session: &mut ConversationSession,
        text: &str,
        lower: &str,
        speaker: &ResponseSpeaker,
    ) -> Result<(), PipelineError> {
        let topic = modes::briefing_topic(lower);
        let prompt = session.start_briefing(topic.clone()).opening_prompt();
        tracing::info!(
            session_id = %self.session_id,
            topic = if topic.is_empty() { "(general)" } else { topic.as_str() },
            "Briefing started"
        );
        self.publish(SessionEvent::BriefingStart {
            session_id: self.session_id.clone(),
            topic,
            timestamp: unix_timestamp(),
        });

        let options = RespondOptions::new(PromptSource::PhoneBriefing)
            .with_max_tokens(self.config.max_tokens_briefing);
        let messages = self.context_with(session, prompt);
        let reply = self.speak(messages, &options, speaker).await;
        self.finish_turn(session, text, reply, speaker).await
    }

    async fn on_conversational_turn(
        &self,
        session: &mut ConversationSession,
        text: &str,
        lower: &str,
        speaker: &ResponseSpeaker,
    ) -> Result<(), PipelineError> {
        let starts_minutes = modes::is_minutes_start(lower);
        let starts_briefing = modes::is_briefing_start(lower);

        if starts_minutes || starts_briefing {
            if !speaker.confirmed().await {
                return Err(PipelineError::Cancelled);
            }
            if starts_minutes {
                session.start_minutes();
                tracing::info!(session_id = %self.session_id, "Minutes started");
                self.publish(SessionEvent::MinutesStart {
                    session_id: self.session_id.clone(),
                    timestamp: unix_timestamp(),
                });
            }
            if starts_briefing {
                return self.start_briefing(session, text, lower, speaker).await;
            }
        }

        let mut profile = session.profile.clone();
        profile.update(text);
        let hint = profile.style_hint();
        if hint.is_some() {
            tracing::debug!(
                session_id = %self.session_id,
                style = profile.style().as_str(),
                avg_words = profile.avg_words(),
                "Adapting to speaking profile"
            );
        }

        let options = RespondOptions::new(PromptSource::Phone).with_style_hint(hint);
        let messages = self.context_with(session, text.to_string());
        let reply = self.speak(messages, &options, speaker).await;

        if reply.is_ok() && speaker.is_confirmed() {
            session.profile = profile;
        }
        self.finish_turn(session, text, reply, speaker).await
    }
}

#[async_trait]
impl TurnHandler for CallConversation {
    async fn on_turn(&self, text: String, speaker: ResponseSpeaker) -> Result<(), PipelineError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let lower = text.to_lowercase();

        let mut session = self.session.lock().await;
        tracing::info!(
            session_id = %self.session_id,
            response = speaker.id(),
            mode = session.mode.as_str(),
            confirmed = speaker.is_confirmed(),
            text = %text,
            "Handling turn"
        );

        match session.mode {
            CallMode::Minutes => {
                self.on_minutes_turn(&mut session, text, &lower, &speaker)
                    .await
            }
            CallMode::Briefing => {
                self.on_briefing_turn(&mut session, text, &lower, &speaker)
                    .await
            }
            CallMode::Conversational => {
                self.on_conversational_turn(&mut session, text, &lower, &speaker)
                    .await
            }
        }
    }
}
