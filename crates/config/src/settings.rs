//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{agent, endpoints, sessions, stt, tools, tts};
use crate::ConfigError;

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, warnings only
    #[default]
    Development,
    /// Staging mode - stricter validation
    Staging,
    /// Production mode - all validations enforced
    Production,
}

impl RuntimeEnvironment {
    /// Check if this is a production environment
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Check if strict validation should be applied
    pub fn is_strict(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub twilio: TwilioConfig,

    #[serde(default)]
    pub stt: SttSettings,

    #[serde(default)]
    pub tts: TtsSettings,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub tools: ToolSettings,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,

    #[serde(default)]
    pub app: AppSettings,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Canned responses, no upstream connections
    #[serde(default)]
    pub demo: bool,
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Public host name Twilio reaches us on (tunnel domain)
    #[serde(default = "default_public_domain")]
    pub public_domain: String,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,

    /// Concurrent calls accepted before new media streams are refused
    #[serde(default = "default_max_calls")]
    pub max_calls: usize,

    /// Calls with no inbound activity for this long are evicted
    #[serde(default = "default_call_idle_timeout")]
    pub call_idle_timeout_secs: u64,
}

fn default_host() -> String {
    std::env::var("VOICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string())
}
fn default_port() -> u16 {
    std::env::var("VOICE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}
fn default_public_domain() -> String {
    std::env::var("TUNNEL_DOMAIN").unwrap_or_else(|_| "localhost".to_string())
}
fn default_true() -> bool {
    true
}
fn default_max_calls() -> usize {
    16
}
fn default_call_idle_timeout() -> u64 {
    3600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_domain: default_public_domain(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_calls: default_max_calls(),
            call_idle_timeout_secs: default_call_idle_timeout(),
        }
    }
}

/// Twilio account and webhook settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    #[serde(default = "default_twilio_sid")]
    pub account_sid: String,

    #[serde(default = "default_twilio_token")]
    pub auth_token: String,

    /// Sender number for outbound SMS, E.164
    #[serde(default = "default_twilio_number")]
    pub phone_number: String,

    /// REST API base for outbound SMS
    #[serde(default = "default_twilio_api")]
    pub api_base: String,

    /// Reject webhooks without a valid X-Twilio-Signature
    #[serde(default = "default_true")]
    pub validate_signatures: bool,

    /// Spoken before the media stream connects
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

fn default_twilio_sid() -> String {
    std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_default()
}
fn default_twilio_token() -> String {
    std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default()
}
fn default_twilio_number() -> String {
    std::env::var("TWILIO_PHONE_NUMBER").unwrap_or_default()
}
fn default_twilio_api() -> String {
    endpoints::TWILIO_API.to_string()
}
fn default_greeting() -> String {
    "Connecting to Charlotte.".to_string()
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            account_sid: default_twilio_sid(),
            auth_token: default_twilio_token(),
            phone_number: default_twilio_number(),
            api_base: default_twilio_api(),
            validate_signatures: true,
            greeting: default_greeting(),
        }
    }
}

/// How the transcription upstream decides a turn is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TurnStrategy {
    /// Silence-based endpointing (`speech_final`)
    #[default]
    Endpointing,
    /// Model-based end-of-turn with eager commits
    ModelTurn,
}

/// Reconnect policy for the transcription socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_reconnect_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_reconnect_base")]
    pub base_delay_ms: u64,

    #[serde(default = "default_reconnect_max")]
    pub max_delay_ms: u64,
}

fn default_reconnect_attempts() -> u32 {
    stt::RECONNECT_MAX_ATTEMPTS
}
fn default_reconnect_base() -> u64 {
    stt::RECONNECT_BASE_DELAY_MS
}
fn default_reconnect_max() -> u64 {
    stt::RECONNECT_MAX_DELAY_MS
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_reconnect_attempts(),
            base_delay_ms: default_reconnect_base(),
            max_delay_ms: default_reconnect_max(),
        }
    }
}

/// Speech-to-text upstream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttSettings {
    #[serde(default = "default_deepgram_key")]
    pub api_key: String,

    /// Overrides the strategy's default endpoint
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_stt_model")]
    pub model: String,

    #[serde(default = "default_stt_encoding")]
    pub encoding: String,

    #[serde(default = "default_stt_sample_rate")]
    pub sample_rate: u32,

    #[serde(default = "default_endpointing")]
    pub endpointing_ms: u32,

    #[serde(default)]
    pub turn_strategy: TurnStrategy,

    #[serde(default = "default_eager_threshold")]
    pub eager_eot_threshold: f32,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

fn default_deepgram_key() -> String {
    std::env::var("DEEPGRAM_API_KEY").unwrap_or_default()
}
fn default_stt_model() -> String {
    stt::MODEL.to_string()
}
fn default_stt_encoding() -> String {
    "mulaw".to_string()
}
fn default_stt_sample_rate() -> u32 {
    8000
}
fn default_endpointing() -> u32 {
    stt::ENDPOINTING_MS
}
fn default_eager_threshold() -> f32 {
    stt::EAGER_EOT_THRESHOLD
}

impl Default for SttSettings {
    fn default() -> Self {
        Self {
            api_key: default_deepgram_key(),
            endpoint: None,
            model: default_stt_model(),
            encoding: default_stt_encoding(),
            sample_rate: default_stt_sample_rate(),
            endpointing_ms: default_endpointing(),
            turn_strategy: TurnStrategy::default(),
            eager_eot_threshold: default_eager_threshold(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl SttSettings {
    /// Endpoint for the configured strategy
    pub fn resolved_endpoint(&self) -> &str {
        match (&self.endpoint, self.turn_strategy) {
            (Some(endpoint), _) => endpoint,
            (None, TurnStrategy::Endpointing) => endpoints::DEEPGRAM_LISTEN_V1,
            (None, TurnStrategy::ModelTurn) => endpoints::DEEPGRAM_LISTEN_V2,
        }
    }
}

/// Text-to-speech upstream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsSettings {
    #[serde(default = "default_elevenlabs_key")]
    pub api_key: String,

    #[serde(default = "default_tts_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_voice_id")]
    pub voice_id: String,

    #[serde(default = "default_tts_model")]
    pub model_id: String,

    #[serde(default = "default_output_format")]
    pub output_format: String,

    #[serde(default = "default_stability")]
    pub stability: f32,

    #[serde(default = "default_similarity")]
    pub similarity_boost: f32,

    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,

    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_secs: u64,
}

fn default_elevenlabs_key() -> String {
    std::env::var("ELEVENLABS_API_KEY").unwrap_or_default()
}
fn default_tts_endpoint() -> String {
    endpoints::ELEVENLABS_WS.to_string()
}
fn default_voice_id() -> String {
    std::env::var("ELEVENLABS_VOICE_ID").unwrap_or_else(|_| tts::VOICE_ID.to_string())
}
fn default_tts_model() -> String {
    tts::MODEL_ID.to_string()
}
fn default_output_format() -> String {
    tts::OUTPUT_FORMAT.to_string()
}
fn default_stability() -> f32 {
    tts::STABILITY
}
fn default_similarity() -> f32 {
    tts::SIMILARITY_BOOST
}
fn default_receive_timeout() -> u64 {
    tts::RECEIVE_TIMEOUT_SECS
}
fn default_drain_timeout() -> u64 {
    tts::DRAIN_TIMEOUT_SECS
}

impl Default for TtsSettings {
    fn default() -> Self {
        Self {
            api_key: default_elevenlabs_key(),
            endpoint: default_tts_endpoint(),
            voice_id: default_voice_id(),
            model_id: default_tts_model(),
            output_format: default_output_format(),
            stability: default_stability(),
            similarity_boost: default_similarity(),
            receive_timeout_secs: default_receive_timeout(),
            drain_timeout_secs: default_drain_timeout(),
        }
    }
}

/// Reasoning engine and agent loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_anthropic_key")]
    pub api_key: String,

    #[serde(default = "default_anthropic_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_agent_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_max_tokens_briefing")]
    pub max_tokens_briefing: u32,

    #[serde(default = "default_max_tokens_sms")]
    pub max_tokens_sms: u32,

    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Messages of history sent with each request
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_anthropic_key() -> String {
    std::env::var("ANTHROPIC_API_KEY").unwrap_or_default()
}
fn default_anthropic_endpoint() -> String {
    endpoints::ANTHROPIC_API.to_string()
}
fn default_agent_model() -> String {
    std::env::var("CLAUDE_MODEL").unwrap_or_else(|_| agent::MODEL.to_string())
}
fn default_max_tokens() -> u32 {
    std::env::var("CLAUDE_MAX_TOKENS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(agent::MAX_TOKENS)
}
fn default_max_tokens_briefing() -> u32 {
    agent::MAX_TOKENS_BRIEFING
}
fn default_max_tokens_sms() -> u32 {
    agent::MAX_TOKENS_SMS
}
fn default_max_tool_rounds() -> u32 {
    agent::MAX_TOOL_ROUNDS
}
fn default_context_messages() -> usize {
    agent::CONTEXT_MESSAGES
}
fn default_request_timeout() -> u64 {
    agent::REQUEST_TIMEOUT_SECS
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            api_key: default_anthropic_key(),
            endpoint: default_anthropic_endpoint(),
            model: default_agent_model(),
            max_tokens: default_max_tokens(),
            max_tokens_briefing: default_max_tokens_briefing(),
            max_tokens_sms: default_max_tokens_sms(),
            max_tool_rounds: default_max_tool_rounds(),
            context_messages: default_context_messages(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Tool sandbox settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Roots the filesystem and shell tools may touch
    #[serde(default = "default_allowed_paths")]
    pub allowed_paths: Vec<String>,

    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_max_read_lines")]
    pub max_read_lines: usize,
}

fn default_allowed_paths() -> Vec<String> {
    match std::env::var("HOME") {
        Ok(home) => vec![format!("{}/charlotte", home), format!("{}/dev", home)],
        Err(_) => Vec::new(),
    }
}
fn default_blocked_commands() -> Vec<String> {
    tools::BLOCKED_COMMANDS.iter().map(|s| s.to_string()).collect()
}
fn default_command_timeout() -> u64 {
    tools::COMMAND_TIMEOUT_SECS
}
fn default_max_read_lines() -> usize {
    tools::MAX_READ_LINES
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            allowed_paths: default_allowed_paths(),
            blocked_commands: default_blocked_commands(),
            command_timeout_secs: default_command_timeout(),
            max_read_lines: default_max_read_lines(),
        }
    }
}

/// Persistence configuration for ScyllaDB
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Enable ScyllaDB persistence (false = in-memory only)
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_scylla_hosts")]
    pub scylla_hosts: Vec<String>,

    #[serde(default = "default_scylla_keyspace")]
    pub keyspace: String,

    #[serde(default = "default_replication_factor")]
    pub replication_factor: u8,

    /// Sessions idle longer than this start fresh
    #[serde(default = "default_session_expiry")]
    pub session_expiry_hours: u64,
}

fn default_scylla_hosts() -> Vec<String> {
    std::env::var("SCYLLA_HOSTS")
        .map(|s| s.split(',').map(|h| h.trim().to_string()).collect())
        .unwrap_or_else(|_| vec!["127.0.0.1:9042".to_string()])
}
fn default_scylla_keyspace() -> String {
    std::env::var("SCYLLA_KEYSPACE").unwrap_or_else(|_| sessions::KEYSPACE.to_string())
}
fn default_replication_factor() -> u8 {
    1
}
fn default_session_expiry() -> u64 {
    std::env::var("SESSION_EXPIRY_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(sessions::EXPIRY_HOURS)
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scylla_hosts: default_scylla_hosts(),
            keyspace: default_scylla_keyspace(),
            replication_factor: default_replication_factor(),
            session_expiry_hours: default_session_expiry(),
        }
    }
}

/// Companion app socket (`/app/ws`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Clients must pass this as `?token=`; empty accepts any client
    #[serde(default = "default_app_token")]
    pub auth_token: String,

    /// Push-to-talk audio from the app
    #[serde(default = "default_app_encoding")]
    pub encoding: String,

    #[serde(default = "default_app_sample_rate")]
    pub sample_rate: u32,

    /// Synthesis format sent back to the app, passed through untouched
    #[serde(default = "default_app_output_format")]
    pub output_format: String,

    /// Messages replayed to a client when it connects
    #[serde(default = "default_app_history")]
    pub history_messages: usize,
}

fn default_app_token() -> String {
    std::env::var("APP_AUTH_TOKEN").unwrap_or_default()
}
fn default_app_encoding() -> String {
    "linear16".to_string()
}
fn default_app_sample_rate() -> u32 {
    16000
}
fn default_app_output_format() -> String {
    "mp3_44100_128".to_string()
}
fn default_app_history() -> usize {
    20
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_token: default_app_token(),
            encoding: default_app_encoding(),
            sample_rate: default_app_sample_rate(),
            output_format: default_app_output_format(),
            history_messages: default_app_history(),
        }
    }
}

/// Notification side-channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,

    /// HTTP bridge into the message bus
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default = "default_publish_timeout")]
    pub timeout_ms: u64,
}

fn default_topic() -> String {
    "charlotte/voice/session".to_string()
}
fn default_publish_timeout() -> u64 {
    2000
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            topic: default_topic(),
            timeout_ms: default_publish_timeout(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub tracing_enabled: bool,

    /// OTLP endpoint for traces
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            tracing_enabled: true,
            otlp_endpoint: None,
            metrics_enabled: true,
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_stt()?;
        self.validate_tts()?;
        self.validate_agent()?;

        if self.environment.is_strict() && !self.demo {
            let missing = self.missing_keys();
            if !missing.is_empty() {
                return Err(ConfigError::MissingField(missing.join(", ")));
            }
        }

        if self.environment.is_production() && !self.twilio.validate_signatures {
            return Err(ConfigError::InvalidValue {
                field: "twilio.validate_signatures".to_string(),
                message: "Signature checks cannot be disabled in production".to_string(),
            });
        }

        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port cannot be 0".to_string(),
            });
        }

        if self.server.max_calls == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_calls".to_string(),
                message: "Must accept at least one call".to_string(),
            });
        }

        Ok(())
    }

    fn validate_stt(&self) -> Result<(), ConfigError> {
        let stt = &self.stt;

        if !matches!(stt.encoding.as_str(), "mulaw" | "linear16") {
            return Err(ConfigError::InvalidValue {
                field: "stt.encoding".to_string(),
                message: format!("Expected mulaw or linear16, got {}", stt.encoding),
            });
        }

        if stt.reconnect.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stt.reconnect.max_attempts".to_string(),
                message: "Must allow at least one attempt".to_string(),
            });
        }

        if stt.reconnect.base_delay_ms > stt.reconnect.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "stt.reconnect.base_delay_ms".to_string(),
                message: format!(
                    "Base delay {}ms exceeds cap {}ms",
                    stt.reconnect.base_delay_ms, stt.reconnect.max_delay_ms
                ),
            });
        }

        if !(0.0..=1.0).contains(&stt.eager_eot_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "stt.eager_eot_threshold".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", stt.eager_eot_threshold),
            });
        }

        Ok(())
    }

    fn validate_tts(&self) -> Result<(), ConfigError> {
        let tts = &self.tts;

        if voice_gateway_core::AudioFormat::parse(&tts.output_format).is_none() {
            return Err(ConfigError::InvalidValue {
                field: "tts.output_format".to_string(),
                message: format!("Unsupported output format: {}", tts.output_format),
            });
        }

        for (field, value) in [
            ("tts.stability", tts.stability),
            ("tts.similarity_boost", tts.similarity_boost),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: format!("Must be between 0.0 and 1.0, got {}", value),
                });
            }
        }

        if tts.drain_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tts.drain_timeout_secs".to_string(),
                message: "Drain timeout cannot be 0".to_string(),
            });
        }

        Ok(())
    }

    fn validate_agent(&self) -> Result<(), ConfigError> {
        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.max_tool_rounds".to_string(),
                message: "Round budget must be at least 1".to_string(),
            });
        }

        if self.agent.max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.max_tokens".to_string(),
                message: "max_tokens cannot be 0".to_string(),
            });
        }

        Ok(())
    }

    /// Vendor keys that are not configured
    pub fn missing_keys(&self) -> Vec<&'static str> {
        if self.demo {
            return Vec::new();
        }
        let mut missing = Vec::new();
        if self.stt.api_key.is_empty() {
            missing.push("DEEPGRAM_API_KEY");
        }
        if self.tts.api_key.is_empty() {
            missing.push("ELEVENLABS_API_KEY");
        }
        if self.agent.api_key.is_empty() {
            missing.push("ANTHROPIC_API_KEY");
        }
        missing
    }

    /// Summary of which integrations are configured, without secrets
    pub fn status_line(&self) -> String {
        let flag = |ok: bool| if ok { "OK" } else { "missing" };
        format!(
            "twilio={} deepgram={} elevenlabs={} anthropic={} notifications={}",
            flag(!self.twilio.account_sid.is_empty() && !self.twilio.auth_token.is_empty()),
            flag(!self.stt.api_key.is_empty()),
            flag(!self.tts.api_key.is_empty()),
            flag(!self.agent.api_key.is_empty()),
            self.notifications
                .endpoint
                .as_deref()
                .filter(|_| self.notifications.enabled)
                .unwrap_or("off"),
        )
    }
}

/// Load settings from files and environment
///
/// Priority (highest to lowest):
/// 1. Environment variables (VOICE_GATEWAY_ prefix, `__` separator)
/// 2. config/{env}.toml (if env specified)
/// 3. config/default.toml
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("VOICE_GATEWAY")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}
