//! Conversation and session types shared across crates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Speaker of a stored message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// One message of the persisted conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Where a conversation session came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSource {
    /// Twilio voice call
    Phone,
    /// Twilio SMS thread
    Sms,
    /// Demo endpoint
    Demo,
    /// Companion app socket
    App,
}

impl SessionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionSource::Phone => "phone",
            SessionSource::Sms => "sms",
            SessionSource::Demo => "demo",
            SessionSource::App => "app",
        }
    }
}

impl fmt::Display for SessionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "phone" => Ok(SessionSource::Phone),
            "sms" => Ok(SessionSource::Sms),
            "demo" => Ok(SessionSource::Demo),
            "app" => Ok(SessionSource::App),
            other => Err(format!("unknown session source: {}", other)),
        }
    }
}

/// Durable session row: one per (identifier, source) within the expiry window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    /// Call SID, phone number or demo user
    pub identifier: String,
    pub source: SessionSource,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Session record together with its ordered history
#[derive(Debug, Clone)]
pub struct LoadedSession {
    pub record: SessionRecord,
    pub history: Vec<ChatMessage>,
}

/// A saved note
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub session_id: Option<String>,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Note {
    /// Case-insensitive substring match over title or content
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.to_lowercase();
        self.title.to_lowercase().contains(&needle) || self.content.to_lowercase().contains(&needle)
    }
}

/// Overlay mode of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    #[default]
    Conversational,
    Minutes,
    Briefing,
}

impl CallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMode::Conversational => "conversational",
            CallMode::Minutes => "minutes",
            CallMode::Briefing => "briefing",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!(Role::Assistant.as_str(), "assistant");
        assert!("tool".parse::<Role>().is_err());
    }

    #[test]
    fn test_source_parse() {
        assert_eq!("app".parse::<SessionSource>().unwrap(), SessionSource::App);
        assert_eq!(SessionSource::Sms.to_string(), "sms");
        assert!("fax".parse::<SessionSource>().is_err());
    }

    #[test]
    fn test_note_matches_case_insensitive() {
        let note = Note {
            id: "n1".to_string(),
            session_id: None,
            title: "Compressor".to_string(),
            content: "Check the readings tomorrow".to_string(),
            created_at: Utc::now(),
        };
        assert!(note.matches("compressor"));
        assert!(note.matches("READINGS"));
        assert!(!note.matches("boiler"));
    }
}
