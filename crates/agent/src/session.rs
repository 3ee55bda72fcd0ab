//! In-flight conversation state for one call or text thread

use voice_gateway_core::{CallMode, ChatMessage, LoadedSession, Role, SessionRecord};
use voice_gateway_llm::Message;

use crate::modes::{BriefingState, MinutesState};
use crate::profile::SpeakingProfile;

/// Durable record plus the overlay state that lives only for the call
#[derive(Debug, Clone)]
pub struct ConversationSession {
    pub record: SessionRecord,
    pub history: Vec<ChatMessage>,
    pub mode: CallMode,
    pub last_entity: String,
    pub profile: SpeakingProfile,
    pub minutes: Option<MinutesState>,
    pub briefing: Option<BriefingState>,
}

impl ConversationSession {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    /// Record a message locally; the caller persists it
    pub fn push(&mut self, role: Role, content: &str) {
        self.history.push(ChatMessage::new(role, content));
    }

    /// Last `limit` messages in reasoning-engine format
    pub fn context_messages(&self, limit: usize) -> Vec<Message> {
        let start = self.history.len().saturating_sub(limit);
        let mut messages: Vec<Message> = self.history[start..]
            .iter()
            .map(|m| match m.role {
                Role::User => Message::user(m.content.clone()),
                Role::Assistant => Message::assistant(m.content.clone()),
            })
            .collect();

        // The engine requires the first message to come from the user
        while messages.first().is_some_and(|m| m.role != Role::User) {
            messages.remove(0);
        }
        messages
    }

    pub fn start_minutes(&mut self) {
        self.mode = CallMode::Minutes;
        self.minutes = Some(MinutesState::start());
    }

    /// Leave minutes mode, returning what was recorded
    pub fn finish_minutes(&mut self) -> Option<MinutesState> {
        self.mode = CallMode::Conversational;
        self.minutes.take()
    }

    pub fn start_briefing(&mut self, topic: impl Into<String>) -> &BriefingState {
        self.mode = CallMode::Briefing;
        self.briefing.insert(BriefingState::start(topic))
    }

    pub fn finish_briefing(&mut self) -> Option<BriefingState> {
        self.mode = CallMode::Conversational;
        self.briefing.take()
    }
}

impl From<LoadedSession> for ConversationSession {
    fn from(loaded: LoadedSession) -> Self {
        Self {
            record: loaded.record,
            history: loaded.history,
            mode: CallMode::Conversational,
            last_entity: String::new(),
            profile: SpeakingProfile::new(),
            minutes: None,
            briefing: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use voice_gateway_core::SessionSource;

    fn session() -> ConversationSession {
        let now = Utc::now();
        ConversationSession::from(LoadedSession {
            record: SessionRecord {
                id: "s1".to_string(),
                identifier: "CA123".to_string(),
                source: SessionSource::Phone,
                created_at: now,
                last_active: now,
            },
            history: Vec::new(),
        })
    }

    #[test]
    fn test_context_window_starts_with_user() {
        let mut session = session();
        session.push(Role::User, "one");
        session.push(Role::Assistant, "two");
        session.push(Role::User, "three");
        session.push(Role::Assistant, "four");

        let all = session.context_messages(50);
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].text(), "one");

        // Window of 3 would start on an assistant message
        let window = session.context_messages(3);
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].text(), "three");
        assert_eq!(window[1].role, Role::Assistant);
    }

    #[test]
    fn test_mode_transitions() {
        let mut session = session();
        session.start_minutes();
        assert_eq!(session.mode, CallMode::Minutes);
        assert!(session.finish_minutes().is_some());
        assert_eq!(session.mode, CallMode::Conversational);

        let topic = session.start_briefing("roof").topic.clone();
        assert_eq!(topic, "roof");
        assert_eq!(session.mode, CallMode::Briefing);
        assert_eq!(session.finish_briefing().map(|b| b.turn_count), Some(1));
        assert!(session.briefing.is_none());
    }
}
