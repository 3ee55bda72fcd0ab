//! ScyllaDB schema creation
//!
//! All timestamps are stored as BIGINT milliseconds since the epoch.

use crate::error::PersistenceError;
use scylla::Session;

/// Create the keyspace if it doesn't exist
pub async fn create_keyspace(
    session: &Session,
    keyspace: &str,
    replication_factor: u8,
) -> Result<(), PersistenceError> {
    let query = format!(
        "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
        keyspace, replication_factor
    );

    session
        .query_unpaged(query, &[])
        .await
        .map_err(|e| PersistenceError::SchemaError(format!("Failed to create keyspace: {}", e)))?;

    Ok(())
}

/// Create all required tables
pub async fn create_tables(session: &Session, keyspace: &str) -> Result<(), PersistenceError> {
    let tables = [
        (
            "sessions_by_identifier",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {}.sessions_by_identifier (
            identifier TEXT,
            source TEXT,
            last_active BIGINT,
            session_id TEXT,
            PRIMARY KEY ((identifier, source), last_active, session_id)
        ) WITH CLUSTERING ORDER BY (last_active DESC, session_id ASC)
    "#,
                keyspace
            ),
        ),
        (
            "sessions",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {}.sessions (
            session_id TEXT,
            identifier TEXT,
            source TEXT,
            created_at BIGINT,
            last_active BIGINT,
            PRIMARY KEY (session_id)
        )
    "#,
                keyspace
            ),
        ),
        (
            "messages",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {}.messages (
            session_id TEXT,
            seq BIGINT,
            message_id TEXT,
            role TEXT,
            content TEXT,
            PRIMARY KEY ((session_id), seq, message_id)
        ) WITH CLUSTERING ORDER BY (seq ASC, message_id ASC)
    "#,
                keyspace
            ),
        ),
        (
            "notes",
            format!(
                r#"
        CREATE TABLE IF NOT EXISTS {}.notes (
            bucket TEXT,
            created_at BIGINT,
            note_id TEXT,
            session_id TEXT,
            title TEXT,
            content TEXT,
            PRIMARY KEY ((bucket), created_at, note_id)
        ) WITH CLUSTERING ORDER BY (created_at DESC, note_id ASC)
    "#,
                keyspace
            ),
        ),
    ];

    for (name, ddl) in tables {
        session.query_unpaged(ddl, &[]).await.map_err(|e| {
            PersistenceError::SchemaError(format!("Failed to create {} table: {}", name, e))
        })?;
    }

    Ok(())
}
