//! Configuration management for the voice gateway
//!
//! Supports loading configuration from:
//! - TOML files (`config/default.toml`, `config/{env}.toml`)
//! - Environment variables (VOICE_GATEWAY_ prefix, `__` separator)
//! - Vendor key variables (`DEEPGRAM_API_KEY`, `ELEVENLABS_API_KEY`, ...)
//!   as fallbacks for unset secrets

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, AgentSettings, AppSettings, NotificationConfig, ObservabilityConfig,
    PersistenceConfig, ReconnectConfig, RuntimeEnvironment, ServerConfig, Settings, SttSettings,
    ToolSettings, TtsSettings, TurnStrategy, TwilioConfig,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
