//! Centralized constants for the voice gateway
//!
//! Single source of truth for defaults that more than one crate needs.

/// Upstream service endpoints
pub mod endpoints {
    /// Deepgram streaming transcription (Nova, silence endpointing)
    pub const DEEPGRAM_LISTEN_V1: &str = "wss://api.deepgram.com/v1/listen";

    /// Deepgram streaming transcription (Flux, model-based turn detection)
    pub const DEEPGRAM_LISTEN_V2: &str = "wss://api.deepgram.com/v2/listen";

    /// ElevenLabs websocket synthesis base
    pub const ELEVENLABS_WS: &str = "wss://api.elevenlabs.io/v1/text-to-speech";

    /// Anthropic Messages API base
    pub const ANTHROPIC_API: &str = "https://api.anthropic.com";

    /// Twilio REST API base, for outbound SMS
    pub const TWILIO_API: &str = "https://api.twilio.com";
}

/// Speech-to-text defaults
pub mod stt {
    pub const MODEL: &str = "nova-2";
    pub const FLUX_MODEL: &str = "flux-general-en";
    pub const ENDPOINTING_MS: u32 = 300;
    pub const EAGER_EOT_THRESHOLD: f32 = 0.5;
    pub const RECONNECT_MAX_ATTEMPTS: u32 = 5;
    pub const RECONNECT_BASE_DELAY_MS: u64 = 250;
    pub const RECONNECT_MAX_DELAY_MS: u64 = 4_000;
}

/// Text-to-speech defaults
pub mod tts {
    /// "Rachel"
    pub const VOICE_ID: &str = "21m00Tcm4TlvDq8ikWAM";
    pub const MODEL_ID: &str = "eleven_turbo_v2_5";
    pub const OUTPUT_FORMAT: &str = "ulaw_8000";
    pub const STABILITY: f32 = 0.5;
    pub const SIMILARITY_BOOST: f32 = 0.75;
    pub const RECEIVE_TIMEOUT_SECS: u64 = 30;
    /// Ceiling on waiting for the last audio chunk after flush
    pub const DRAIN_TIMEOUT_SECS: u64 = 30;
}

/// Reasoning engine defaults
pub mod agent {
    pub const MODEL: &str = "claude-sonnet-4-5-20250929";
    pub const MAX_TOKENS: u32 = 500;
    pub const MAX_TOKENS_BRIEFING: u32 = 1024;
    pub const MAX_TOKENS_SMS: u32 = 300;
    /// Round budget of the tool loop
    pub const MAX_TOOL_ROUNDS: u32 = 10;
    pub const CONTEXT_MESSAGES: usize = 50;
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;
}

/// Session persistence defaults
pub mod sessions {
    pub const EXPIRY_HOURS: u64 = 72;
    pub const KEYSPACE: &str = "voice_gateway";
}

/// Tool sandbox defaults
pub mod tools {
    pub const COMMAND_TIMEOUT_SECS: u64 = 30;
    pub const MAX_READ_LINES: usize = 200;

    /// Substrings that make a shell command refuse to run
    pub const BLOCKED_COMMANDS: &[&str] = &[
        "rm -rf /",
        "mkfs",
        "dd if=",
        "shutdown",
        "reboot",
        "passwd",
        "userdel",
        "useradd",
        "chmod 777",
        "> /dev/sd",
        ":(){ :|:& };:",
    ];
}
