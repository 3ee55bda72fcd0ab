//! Speech-to-text streaming
//!
//! A recognizer owns one upstream transcription socket per call and turns
//! inbound audio into a channel of typed [`SttEvent`]s. The turn controller
//! is the only consumer of that channel.

pub mod assembler;
pub mod deepgram;
pub mod demo;

pub use assembler::TurnAssembler;

use async_trait::async_trait;
use std::time::Duration;
use voice_gateway_config::{SttSettings, TurnStrategy};

use crate::PipelineError;

/// Events delivered by a recognizer, in upstream order
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    /// Partial or final recognition result; display and logging only
    Transcript { text: String, is_final: bool },
    /// Upstream VAD heard the caller start talking
    SpeechStarted,
    /// Confirmed end of turn carrying the accumulated turn text
    Utterance(String),
    /// Speculative end of turn, may be withdrawn
    EagerUtterance(String),
    /// The last speculative end of turn was withdrawn
    UtteranceCancelled,
    /// Upstream dropped; a reconnect attempt is pending
    Reconnecting { attempt: u32 },
    /// Reconnects exhausted or the stream was closed
    Stopped,
}

impl SttEvent {
    /// Short name for logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            SttEvent::Transcript { .. } => "transcript",
            SttEvent::SpeechStarted => "speech_started",
            SttEvent::Utterance(_) => "utterance",
            SttEvent::EagerUtterance(_) => "eager_utterance",
            SttEvent::UtteranceCancelled => "utterance_cancelled",
            SttEvent::Reconnecting { .. } => "reconnecting",
            SttEvent::Stopped => "stopped",
        }
    }
}

/// Streaming recognizer seam
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open the upstream stream. On failure the recognizer stays disconnected.
    async fn connect(&self) -> Result<(), PipelineError>;

    /// Queue audio for upstream. Dropped silently while disconnected.
    fn send_audio(&self, audio: Vec<u8>);

    fn is_connected(&self) -> bool;

    /// Close the stream; idempotent
    async fn close(&self);
}

/// Bounded exponential backoff for upstream reconnects
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Delay before the given 1-based attempt, without jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(4_000),
        }
    }
}

/// Recognizer parameters fixed at construction
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub api_key: String,
    pub endpoint: String,
    pub model: String,
    pub encoding: String,
    pub sample_rate: u32,
    pub endpointing_ms: u32,
    pub strategy: TurnStrategy,
    pub eager_eot_threshold: f32,
    pub reconnect: ReconnectPolicy,
    /// Audio chunks buffered toward upstream before new ones are dropped
    pub audio_queue: usize,
}

impl SttConfig {
    pub fn from_settings(settings: &SttSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            endpoint: settings.resolved_endpoint().to_string(),
            model: settings.model.clone(),
            encoding: settings.encoding.clone(),
            sample_rate: settings.sample_rate,
            endpointing_ms: settings.endpointing_ms,
            strategy: settings.turn_strategy,
            eager_eot_threshold: settings.eager_eot_threshold,
            reconnect: ReconnectPolicy {
                max_attempts: settings.reconnect.max_attempts,
                base_delay: Duration::from_millis(settings.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(settings.reconnect.max_delay_ms),
            },
            audio_queue: 512,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_then_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(2), Duration::from_millis(500));
        assert_eq!(policy.delay(3), Duration::from_millis(1_000));
        assert_eq!(policy.delay(5), Duration::from_millis(4_000));
        assert_eq!(policy.delay(30), Duration::from_millis(4_000));
    }

    #[test]
    fn test_config_from_settings() {
        let settings = SttSettings::default();
        let config = SttConfig::from_settings(&settings);
        assert_eq!(config.sample_rate, 8000);
        assert_eq!(config.encoding, "mulaw");
        assert_eq!(config.reconnect.max_attempts, 5);
    }
}
