//! In-memory conversation store
//!
//! Same semantics as the ScyllaDB store. Used when persistence is disabled,
//! in demo mode and in tests.

use crate::conversations::ConversationStore;
use crate::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use voice_gateway_core::{ChatMessage, LoadedSession, Note, Role, SessionRecord, SessionSource};

#[derive(Default)]
struct Inner {
    sessions: HashMap<String, SessionRecord>,
    messages: HashMap<String, Vec<ChatMessage>>,
    /// Insertion order is creation order
    notes: Vec<Note>,
}

impl Inner {
    /// Drop sessions idle past `expiry` together with their history
    fn purge_expired(&mut self, now: DateTime<Utc>, expiry_ms: i64) -> usize {
        let expired: Vec<String> = self
            .sessions
            .values()
            .filter(|s| (now - s.last_active).num_milliseconds() >= expiry_ms)
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            self.sessions.remove(id);
            self.messages.remove(id);
        }
        expired.len()
    }
}

pub struct InMemoryConversationStore {
    inner: RwLock<Inner>,
    expiry: Duration,
}

impl InMemoryConversationStore {
    pub fn new(expiry: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            expiry,
        }
    }

    /// Remove expired sessions now, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let expiry_ms = self.expiry.as_millis() as i64;
        self.inner.write().purge_expired(Utc::now(), expiry_ms)
    }

    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    pub fn note_count(&self) -> usize {
        self.inner.read().notes.len()
    }

    /// Stored history of a session, oldest first
    pub fn history(&self, session_id: &str) -> Vec<ChatMessage> {
        self.inner
            .read()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(72 * 3600))
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_or_create(
        &self,
        identifier: &str,
        source: SessionSource,
    ) -> Result<LoadedSession, PersistenceError> {
        let now = Utc::now();
        let expiry_ms = self.expiry.as_millis() as i64;
        let mut inner = self.inner.write();

        let purged = inner.purge_expired(now, expiry_ms);
        if purged > 0 {
            tracing::debug!(purged, "Dropped expired in-memory sessions");
        }

        let active = inner
            .sessions
            .values()
            .filter(|s| s.identifier == identifier && s.source == source)
            .max_by_key(|s| s.last_active)
            .cloned();

        if let Some(record) = active {
            let history = inner.messages.get(&record.id).cloned().unwrap_or_default();
            return Ok(LoadedSession { record, history });
        }

        let record = SessionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identifier.to_string(),
            source,
            created_at: now,
            last_active: now,
        };
        inner.sessions.insert(record.id.clone(), record.clone());
        tracing::debug!(session_id = %record.id, source = %source, "Created in-memory session");

        Ok(LoadedSession {
            record,
            history: Vec::new(),
        })
    }

    async fn save_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), PersistenceError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let record = inner
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| PersistenceError::NotFound(format!("session {}", session_id)))?;

        let message = ChatMessage::new(role, content);
        record.last_active = message.timestamp;
        inner
            .messages
            .entry(session_id.to_string())
            .or_default()
            .push(message);

        Ok(())
    }

    async fn save_note(
        &self,
        title: &str,
        content: &str,
        session_id: Option<&str>,
    ) -> Result<Note, PersistenceError> {
        let note = Note {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.map(str::to_string),
            title: title.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };
        self.inner.write().notes.push(note.clone());
        Ok(note)
    }

    async fn search_notes(&self, query: &str, limit: usize) -> Result<Vec<Note>, PersistenceError> {
        let inner = self.inner.read();
        Ok(inner
            .notes
            .iter()
            .rev()
            .filter(|n| n.matches(query))
            .take(limit)
            .cloned()
            .collect())
    }
}
