//! Conversation sessions, message history and notes

use crate::{PersistenceError, ScyllaClient};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use std::time::Duration;
use voice_gateway_core::{ChatMessage, LoadedSession, Note, Role, SessionRecord, SessionSource};

/// Default number of notes returned by a search
pub const DEFAULT_NOTE_LIMIT: usize = 10;

/// Monthly note partitions scanned by a search, newest first
const NOTE_SEARCH_BUCKETS: u32 = 12;

/// Rows pulled from one note partition before client-side filtering
const NOTE_SCAN_LIMIT: i32 = 500;

/// Durable conversation storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Newest session for (identifier, source) active within the expiry
    /// window, with its history in order. Starts a fresh session otherwise.
    async fn get_or_create(
        &self,
        identifier: &str,
        source: SessionSource,
    ) -> Result<LoadedSession, PersistenceError>;

    /// Append a message and refresh the session's last-active time
    async fn save_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<(), PersistenceError>;

    async fn save_note(
        &self,
        title: &str,
        content: &str,
        session_id: Option<&str>,
    ) -> Result<Note, PersistenceError>;

    /// Case-insensitive substring match over title or content, newest first
    async fn search_notes(&self, query: &str, limit: usize) -> Result<Vec<Note>, PersistenceError>;
}

pub(crate) fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

/// Partition key of the notes table: one bucket per calendar month
pub fn note_bucket(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// The bucket for `at` followed by the `count - 1` months before it
fn recent_buckets(at: DateTime<Utc>, count: u32) -> Vec<String> {
    let mut year = at.year();
    let mut month = at.month();
    let mut buckets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        buckets.push(format!("{:04}-{:02}", year, month));
        if month == 1 {
            month = 12;
            year -= 1;
        } else {
            month -= 1;
        }
    }
    buckets
}

/// ScyllaDB-backed conversation store
#[derive(Clone)]
pub struct ScyllaConversationStore {
    client: ScyllaClient,
    expiry: Duration,
}

impl ScyllaConversationStore {
    pub fn new(client: ScyllaClient, expiry: Duration) -> Self {
        Self { client, expiry }
    }

    fn ttl_secs(&self) -> u64 {
        self.expiry.as_secs().max(1)
    }

    async fn load_record(&self, session_id: &str) -> Result<SessionRecord, PersistenceError> {
        let query = format!(
            "SELECT identifier, source, created_at, last_active FROM {}.sessions WHERE session_id = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id,))
            .await?;

        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (identifier, source, created_at, last_active): (String, String, i64, i64) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                let source = source
                    .parse::<SessionSource>()
                    .map_err(PersistenceError::InvalidData)?;

                return Ok(SessionRecord {
                    id: session_id.to_string(),
                    identifier,
                    source,
                    created_at: millis_to_datetime(created_at),
                    last_active: millis_to_datetime(last_active),
                });
            }
        }

        Err(PersistenceError::NotFound(format!("session {}", session_id)))
    }

    async fn load_history(&self, session_id: &str) -> Result<Vec<ChatMessage>, PersistenceError> {
        let query = format!(
            "SELECT seq, role, content FROM {}.messages WHERE session_id = ?",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (session_id,))
            .await?;

        let mut history = Vec::new();
        if let Some(rows) = result.rows {
            for row in rows {
                let (seq, role, content): (i64, String, String) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                let role = role.parse::<Role>().map_err(PersistenceError::InvalidData)?;
                history.push(ChatMessage {
                    role,
                    content,
                    timestamp: DateTime::from_timestamp_micros(seq).unwrap_or_else(Utc::now),
                });
            }
        }

        Ok(history)
    }

    /// Write the index row that makes a session findable by identifier.
    /// Rows expire with the session window.
    async fn index_session(
        &self,
        record: &SessionRecord,
        last_active_ms: i64,
    ) -> Result<(), PersistenceError> {
        let query = format!(
            "INSERT INTO {}.sessions_by_identifier (identifier, source, last_active, session_id) \
             VALUES (?, ?, ?, ?) USING TTL {}",
            self.client.keyspace(),
            self.ttl_secs()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    record.identifier.as_str(),
                    record.source.as_str(),
                    last_active_ms,
                    record.id.as_str(),
                ),
            )
            .await?;

        Ok(())
    }

    async fn create_session(
        &self,
        identifier: &str,
        source: SessionSource,
    ) -> Result<SessionRecord, PersistenceError> {
        let now = Utc::now();
        let record = SessionRecord {
            id: uuid::Uuid::new_v4().to_string(),
            identifier: identifier.to_string(),
            source,
            created_at: now,
            last_active: now,
        };

        let query = format!(
            "INSERT INTO {}.sessions (session_id, identifier, source, created_at, last_active) \
             VALUES (?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    record.id.as_str(),
                    identifier,
                    source.as_str(),
                    now.timestamp_millis(),
                    now.timestamp_millis(),
                ),
            )
            .await?;

        self.index_session(&record, now.timestamp_millis()).await?;

        tracing::info!(session_id = %record.id, source = %source, "Created conversation session");
        Ok(record)
    }

    async fn touch(&self, session_id: &str) -> Result<(), PersistenceError> {
        let mut record = self.load_record(session_id).await?;
        let now = Utc::now();

        let query = format!(
            "UPDATE {}.sessions SET last_active = ? WHERE session_id = ?",
            self.client.keyspace()
        );
        self.client
            .session()
            .query_unpaged(query, (now.timestamp_millis(), session_id))
            .await?;

        record.last_active = now;
        self.index_session(&record, now.timestamp_millis()).await
    }
}

#[async_trait]
impl ConversationStore for ScyllaConversationStore {
    async fn get_or_create(
        &self,
        identifier: &str,
        source: SessionSource,
    ) -> Result<LoadedSession, PersistenceError> {
        let query = format!(
            "SELECT session_id, last_active FROM {}.sessions_by_identifier \
             WHERE identifier = ? AND source = ? LIMIT 1",
            self.client.keyspace()
        );

        let result = self
            .client
            .session()
            .query_unpaged(query, (identifier, source.as_str()))
            .await?;

        let cutoff = Utc::now().timestamp_millis() - self.expiry.as_millis() as i64;
        let mut active = None;
        if let Some(rows) = result.rows {
            if let Some(row) = rows.into_iter().next() {
                let (session_id, last_active): (String, i64) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;
                if last_active > cutoff {
                    active = Some(session_id);
                }
            }
        }

        if let Some(session_id) = active {
            match self.load_record(&session_id).await {
                Ok(record) => {
                    let history = self.load_history(&session_id).await?;
                    tracing::debug!(
                        session_id = %session_id,
                        messages = history.len(),
                        "Resumed conversation session"
                    );
                    return Ok(LoadedSession { record, history });
                }
                Err(PersistenceError::NotFound(_)) => {
                    tracing::warn!(session_id = %session_id, "Index points at missing session");
                }
                Err(e) => return Err(e),
            }
        }

        let record = self.create_session(identifier, source).await?;
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
        let query = format!(
            "INSERT INTO {}.messages (session_id, seq, message_id, role, content) VALUES (?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    session_id,
                    Utc::now().timestamp_micros(),
                    uuid::Uuid::new_v4().to_string(),
                    role.as_str(),
                    content,
                ),
            )
            .await?;

        self.touch(session_id).await
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

        let query = format!(
            "INSERT INTO {}.notes (bucket, created_at, note_id, session_id, title, content) \
             VALUES (?, ?, ?, ?, ?, ?)",
            self.client.keyspace()
        );

        self.client
            .session()
            .query_unpaged(
                query,
                (
                    note_bucket(note.created_at),
                    note.created_at.timestamp_millis(),
                    note.id.as_str(),
                    session_id,
                    title,
                    content,
                ),
            )
            .await?;

        tracing::info!(note_id = %note.id, title = %title, "Note saved");
        Ok(note)
    }

    async fn search_notes(&self, query: &str, limit: usize) -> Result<Vec<Note>, PersistenceError> {
        let select = format!(
            "SELECT created_at, note_id, session_id, title, content FROM {}.notes \
             WHERE bucket = ? LIMIT ?",
            self.client.keyspace()
        );

        let mut found = Vec::new();
        for bucket in recent_buckets(Utc::now(), NOTE_SEARCH_BUCKETS) {
            let result = self
                .client
                .session()
                .query_unpaged(select.clone(), (bucket.as_str(), NOTE_SCAN_LIMIT))
                .await?;

            let Some(rows) = result.rows else {
                continue;
            };

            for row in rows {
                let (created_at, id, session_id, title, content): (
                    i64,
                    String,
                    Option<String>,
                    String,
                    String,
                ) = row
                    .into_typed()
                    .map_err(|e| PersistenceError::InvalidData(e.to_string()))?;

                let note = Note {
                    id,
                    session_id,
                    title,
                    content,
                    created_at: millis_to_datetime(created_at),
                };
                if note.matches(query) {
                    found.push(note);
                    if found.len() >= limit {
                        return Ok(found);
                    }
                }
            }
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_note_bucket_format() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(note_bucket(at), "2025-03");
    }

    #[test]
    fn test_recent_buckets_cross_year() {
        let at = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        assert_eq!(
            recent_buckets(at, 4),
            vec!["2025-02", "2025-01", "2024-12", "2024-11"]
        );
    }
}
