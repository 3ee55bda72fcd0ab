//! Per-call turn controller
//!
//! Single consumer of the recognizer event channel. Confirmed and eager
//! commits start a response task; a new commit supersedes the live one
//! (last committed turn wins); `SpeechStarted` while speaking barges in.
//! Every task carries an explicit cancellation token, and superseding
//! awaits the old task before the next one starts.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use voice_gateway_config::TtsSettings;

use super::speaker::ResponseSpeaker;
use super::{CallContext, OutboundMedia, TurnHandler, TurnState};
use crate::stt::SttEvent;
use crate::tts::SpeechSynthesizer;

/// Controller timing
#[derive(Debug, Clone)]
pub struct TurnControllerConfig {
    /// Ceiling on waiting for the last audio after a response is flushed
    pub drain_timeout: Duration,
    /// How long a cancelled task may take to unwind before it is aborted
    pub unwind_timeout: Duration,
}

impl Default for TurnControllerConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            unwind_timeout: Duration::from_secs(2),
        }
    }
}

impl TurnControllerConfig {
    pub fn from_settings(tts: &TtsSettings) -> Self {
        Self {
            drain_timeout: Duration::from_secs(tts.drain_timeout_secs),
            ..Default::default()
        }
    }
}

/// Why the controller loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerExit {
    /// Shutdown requested by the call
    Shutdown,
    /// Transcription stopped for good; the call should end
    SttStopped,
    /// The recognizer event channel closed
    EventsClosed,
}

struct ActiveResponse {
    id: u64,
    /// Normalized turn text, used to match a confirmation to an eager start
    key: String,
    cancel: CancellationToken,
    confirm: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ActiveResponse {
    fn is_confirmed(&self) -> bool {
        *self.confirm.borrow()
    }
}

/// Drives one call's turns
pub struct TurnController {
    ctx: Arc<CallContext>,
    config: TurnControllerConfig,
    handler: Arc<dyn TurnHandler>,
    events: mpsc::Receiver<SttEvent>,
    shutdown: CancellationToken,
    active: Option<ActiveResponse>,
    next_id: u64,
    done_tx: mpsc::UnboundedSender<u64>,
    done_rx: mpsc::UnboundedReceiver<u64>,
}

impl TurnController {
    pub fn new(
        call_id: impl Into<String>,
        handler: Arc<dyn TurnHandler>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        outbound: mpsc::Sender<OutboundMedia>,
        events: mpsc::Receiver<SttEvent>,
        config: TurnControllerConfig,
    ) -> Self {
        let (state, _) = watch::channel(TurnState::Idle);
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(CallContext {
            call_id: call_id.into(),
            state,
            outbound,
            gate: Mutex::new(()),
            synthesizer,
            drain_timeout: config.drain_timeout,
        });

        Self {
            ctx,
            config,
            handler,
            events,
            shutdown: CancellationToken::new(),
            active: None,
            next_id: 0,
            done_tx,
            done_rx,
        }
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<TurnState> {
        self.ctx.state.subscribe()
    }

    pub fn state(&self) -> TurnState {
        self.ctx.state()
    }

    /// Token that stops the controller loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until shutdown, transcription stop, or the event channel closes
    pub async fn run(mut self) -> ControllerExit {
        self.ctx.set_state(TurnState::ListeningAccumulating);
        tracing::info!(call_id = %self.ctx.call_id, "Turn controller started");

        let exit = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break ControllerExit::Shutdown,

                event = self.events.recv() => match event {
                    Some(SttEvent::Stopped) => break ControllerExit::SttStopped,
                    Some(event) => self.handle_event(event).await,
                    None => break ControllerExit::EventsClosed,
                },

                Some(id) = self.done_rx.recv() => self.response_done(id),
            }
        };

        self.cancel_active(false).await;
        self.ctx.set_state(TurnState::Idle);
        tracing::info!(call_id = %self.ctx.call_id, exit = ?exit, "Turn controller stopped");
        exit
    }

    async fn handle_event(&mut self, event: SttEvent) {
        match event {
            SttEvent::Transcript { text, is_final } => {
                tracing::debug!(call_id = %self.ctx.call_id, is_final, text = %text, "Transcript");
            }
            SttEvent::SpeechStarted => {
                if self.ctx.state() == TurnState::Speaking {
                    self.barge_in().await;
                }
            }
            SttEvent::Utterance(text) => self.commit(text, true).await,
            SttEvent::EagerUtterance(text) => self.commit(text, false).await,
            SttEvent::UtteranceCancelled => {
                if self.active.as_ref().is_some_and(|a| !a.is_confirmed()) {
                    tracing::info!(call_id = %self.ctx.call_id, "Speculative turn withdrawn");
                    self.cancel_active(false).await;
                    self.ctx.set_state(TurnState::ListeningAccumulating);
                }
            }
            SttEvent::Reconnecting { attempt } => {
                tracing::warn!(call_id = %self.ctx.call_id, attempt, "Transcription reconnecting");
            }
            SttEvent::Stopped => {}
        }
    }

    async fn commit(&mut self, text: String, confirmed: bool) {
        let key = normalize(&text);
        if key.is_empty() {
            return;
        }

        // Confirmation of the speculative turn already running
        if confirmed {
            if let Some(active) = self.active.as_ref() {
                if !active.is_confirmed() && active.key == key {
                    active.confirm.send_replace(true);
                    metrics::counter!("voice_turns_total", "kind" => "confirmed").increment(1);
                    tracing::info!(
                        call_id = %self.ctx.call_id,
                        response = active.id,
                        "Speculative turn confirmed"
                    );
                    return;
                }
            }
        }

        let was_speaking = self.ctx.state() == TurnState::Speaking;
        self.cancel_active(was_speaking).await;

        let kind = if confirmed { "confirmed" } else { "eager" };
        metrics::counter!("voice_turns_total", "kind" => kind).increment(1);
        tracing::info!(call_id = %self.ctx.call_id, kind, text = %text, "Turn committed");

        self.start_response(text, key, confirmed);
    }

    fn start_response(&mut self, text: String, key: String, confirmed: bool) {
        self.next_id += 1;
        let id = self.next_id;
        let cancel = self.shutdown.child_token();
        let (confirm, confirm_rx) = watch::channel(confirmed);

        let speaker = ResponseSpeaker::new(id, self.ctx.clone(), cancel.clone(), confirm_rx);
        let handler = self.handler.clone();
        let done_tx = self.done_tx.clone();
        let call_id = self.ctx.call_id.clone();

        self.ctx.set_state(TurnState::AgentResponding);
        let handle = tokio::spawn(async move {
            match handler.on_turn(text, speaker).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(call_id = %call_id, response = id, "Response cancelled");
                }
                Err(e) => {
                    metrics::counter!("voice_errors_total", "component" => "turn").increment(1);
                    tracing::warn!(
                        call_id = %call_id,
                        response = id,
                        error = %e,
                        "Response failed"
                    );
                }
            }
            let _ = done_tx.send(id);
        });

        self.active = Some(ActiveResponse {
            id,
            key,
            cancel,
            confirm,
            handle,
        });
    }

    async fn barge_in(&mut self) {
        metrics::counter!("voice_barge_ins_total").increment(1);
        tracing::info!(call_id = %self.ctx.call_id, "Barge-in");
        self.cancel_active(true).await;
        self.ctx.set_state(TurnState::ListeningAccumulating);
    }

    /// Cancel the live response, optionally clearing far-end playback, and
    /// wait for its task to unwind
    async fn cancel_active(&mut self, clear: bool) {
        let Some(active) = self.active.take() else {
            if clear {
                let _gate = self.ctx.gate.lock().await;
                let _ = self.ctx.outbound.send(OutboundMedia::Clear).await;
            }
            return;
        };

        {
            let _gate = self.ctx.gate.lock().await;
            active.cancel.cancel();
            if clear {
                let _ = self.ctx.outbound.send(OutboundMedia::Clear).await;
                self.ctx.set_state(TurnState::ListeningAccumulating);
            }
        }

        if !active.handle.is_finished() {
            metrics::counter!("voice_responses_cancelled_total").increment(1);
        }

        let mut handle = active.handle;
        if tokio::time::timeout(self.config.unwind_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!(
                call_id = %self.ctx.call_id,
                response = active.id,
                "Cancelled response did not unwind in time, aborting"
            );
            handle.abort();
        }
    }

    fn response_done(&mut self, id: u64) {
        if self.active.as_ref().map(|a| a.id) != Some(id) {
            return;
        }
        self.active = None;
        if self.ctx.state() != TurnState::ListeningAccumulating {
            self.ctx.set_state(TurnState::ListeningAccumulating);
        }
    }
}

/// Lowercase words without punctuation, single-spaced
fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '\'')
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  What notes, do I have? "), "what notes do i have");
        assert_eq!(normalize("What notes do I have"), normalize("what notes do I have?"));
        assert_eq!(normalize("..."), "");
    }
}
