//! Persistence errors

use scylla::transport::errors::{NewSessionError, QueryError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<NewSessionError> for PersistenceError {
    fn from(err: NewSessionError) -> Self {
        PersistenceError::Connection(err.to_string())
    }
}

impl From<QueryError> for PersistenceError {
    fn from(err: QueryError) -> Self {
        PersistenceError::Query(err.to_string())
    }
}
