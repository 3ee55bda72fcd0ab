//! Turn management
//!
//! The [`controller::TurnController`] consumes recognizer events for one call
//! and keeps at most one response live at a time. Each response runs as its
//! own task with a [`speaker::ResponseSpeaker`] that owns its cancellation
//! token and forwards synthesized audio to the telephony leg.

pub mod controller;
pub mod speaker;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};

use crate::tts::SpeechSynthesizer;
use crate::PipelineError;
use speaker::ResponseSpeaker;

/// Controller state as observed by the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Before the transcription stream is up
    Idle,
    /// Listening; final fragments accumulate in the turn buffer
    ListeningAccumulating,
    /// A committed turn is being answered, no audio out yet
    AgentResponding,
    /// Response audio is going out to the caller
    Speaking,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Idle => "idle",
            TurnState::ListeningAccumulating => "listening",
            TurnState::AgentResponding => "responding",
            TurnState::Speaking => "speaking",
        }
    }
}

/// Messages for the telephony leg
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMedia {
    /// 8 kHz mu-law audio
    Audio(Vec<u8>),
    /// Drop whatever the far end has buffered
    Clear,
    /// Playback marker sent after a completed response
    Mark(String),
}

/// Produces the response to one committed turn
///
/// Implementations must honour the speaker's cancellation token at their own
/// checkpoints and return promptly once it fires.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn on_turn(&self, text: String, speaker: ResponseSpeaker) -> Result<(), PipelineError>;
}

/// Per-call context shared by the controller and its response tasks
pub(crate) struct CallContext {
    pub(crate) call_id: String,
    pub(crate) state: watch::Sender<TurnState>,
    pub(crate) outbound: mpsc::Sender<OutboundMedia>,
    /// Serializes audio forwarding against barge-in clears
    pub(crate) gate: Mutex<()>,
    pub(crate) synthesizer: Arc<dyn SpeechSynthesizer>,
    pub(crate) drain_timeout: Duration,
}

impl CallContext {
    pub(crate) fn set_state(&self, next: TurnState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(
                call_id = %self.call_id,
                from = previous.as_str(),
                to = next.as_str(),
                "Turn state changed"
            );
        }
    }

    pub(crate) fn state(&self) -> TurnState {
        *self.state.borrow()
    }
}
