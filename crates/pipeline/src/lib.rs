//! Per-call speech pipeline
//!
//! Features:
//! - Streaming speech-to-text with silence endpointing or model turn detection
//! - Streaming text-to-speech over one socket per response
//! - Sentence splitting for incremental synthesis
//! - Turn controller: commit, speculative commit, barge-in and supersession

pub mod sentence;
pub mod stt;
pub mod tts;
pub mod turn;

pub use sentence::SentenceSplitter;
pub use stt::{
    deepgram::DeepgramStreamer, demo::DemoRecognizer, SpeechRecognizer, SttConfig, SttEvent,
    TurnAssembler,
};
pub use tts::{
    demo::DemoSynthesizer, elevenlabs::ElevenLabsSynthesizer, SpeechSynthesizer,
    SynthesisStream, TtsConfig,
};
pub use turn::{
    controller::{ControllerExit, TurnController, TurnControllerConfig},
    speaker::ResponseSpeaker,
    OutboundMedia, TurnHandler, TurnState,
};

/// Pipeline errors
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Response cancelled")]
    Cancelled,

    #[error("Turn handler error: {0}")]
    Handler(String),
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PipelineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        PipelineError::Connection(err.to_string())
    }
}
