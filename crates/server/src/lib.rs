//! Voice Gateway Server
//!
//! Twilio voice and SMS webhooks, the media stream bridge, the companion
//! app socket, health, metrics and the demo endpoint.

pub mod app;
pub mod http;
pub mod media;
pub mod metrics;
pub mod notify;
pub mod session;
pub mod state;
pub mod twilio;

pub use http::create_router;
pub use media::{DeepgramRecognizers, DemoRecognizers, RecognizerFactory};
pub use metrics::{init_metrics, metrics_handler};
pub use notify::{build_publisher, HttpEventPublisher, LogEventPublisher};
pub use session::{CallSession, CallSessionManager};
pub use state::AppState;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Call capacity reached ({0} active)")]
    CallCapacity(usize),

    #[error("Invalid Twilio signature")]
    InvalidSignature,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::CallCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::InvalidSignature => StatusCode::FORBIDDEN,
            ServerError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Internal details stay in the logs
            ServerError::Persistence(_) | ServerError::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        (StatusCode::from(self), message).into_response()
    }
}

impl From<voice_gateway_persistence::PersistenceError> for ServerError {
    fn from(err: voice_gateway_persistence::PersistenceError) -> Self {
        ServerError::Persistence(err.to_string())
    }
}

impl From<voice_gateway_agent::AgentError> for ServerError {
    fn from(err: voice_gateway_agent::AgentError) -> Self {
        match err {
            voice_gateway_agent::AgentError::Persistence(e) => ServerError::Persistence(e),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
