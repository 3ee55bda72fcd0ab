//! Text-to-speech streaming
//!
//! One synthesis stream per spoken response. Text goes in incrementally,
//! audio comes out incrementally on a channel that ends at the upstream
//! final marker, on socket closure, or when the stream is closed.

pub mod demo;
pub mod elevenlabs;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use voice_gateway_config::TtsSettings;
use voice_gateway_core::AudioFormat;

use crate::PipelineError;

/// Opens synthesis streams
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Connect a fresh stream for one response
    async fn open(&self) -> Result<Box<dyn SynthesisStream>, PipelineError>;

    /// Format of the audio chunks the streams produce
    fn output_format(&self) -> AudioFormat;
}

/// One open synthesis stream
#[async_trait]
pub trait SynthesisStream: Send {
    /// Queue more text; may be called any number of times
    async fn send_text(&mut self, text: &str) -> Result<(), PipelineError>;

    /// No more text is coming
    async fn flush(&mut self) -> Result<(), PipelineError>;

    /// Audio chunk channel. Yields `Some` once; a short or empty sequence
    /// means the upstream ended early, not that the caller should retry.
    fn take_audio(&mut self) -> Option<mpsc::Receiver<Vec<u8>>>;

    /// Stop synthesis and end the audio channel; idempotent
    async fn close(&mut self);
}

/// Synthesizer parameters
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub endpoint: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub stability: f32,
    pub similarity_boost: f32,
    /// Longest wait for any single upstream message
    pub receive_timeout: Duration,
}

impl TtsConfig {
    pub fn from_settings(settings: &TtsSettings) -> Self {
        Self {
            api_key: settings.api_key.clone(),
            endpoint: settings.endpoint.clone(),
            voice_id: settings.voice_id.clone(),
            model_id: settings.model_id.clone(),
            output_format: settings.output_format.clone(),
            stability: settings.stability,
            similarity_boost: settings.similarity_boost,
            receive_timeout: Duration::from_secs(settings.receive_timeout_secs),
        }
    }

    /// Parsed output format; unknown names fall back to telephony mu-law
    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::parse(&self.output_format).unwrap_or(AudioFormat::TELEPHONY)
    }
}
