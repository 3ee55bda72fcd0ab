//! Response speaker
//!
//! Owns one response's cancellation token and speaks the sentences its
//! handler produces: opens a synthesis stream, feeds it, forwards audio to
//! the call, waits for the drain and marks completion. Audio from a
//! speculative turn is held back until the turn is confirmed.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use voice_gateway_core::AudioFormat;

use super::{CallContext, OutboundMedia, TurnState};
use crate::PipelineError;

/// Handle given to a [`super::TurnHandler`] for one response
pub struct ResponseSpeaker {
    id: u64,
    ctx: Arc<CallContext>,
    cancel: CancellationToken,
    confirmed: watch::Receiver<bool>,
    committed_at: Instant,
}

impl ResponseSpeaker {
    pub(crate) fn new(
        id: u64,
        ctx: Arc<CallContext>,
        cancel: CancellationToken,
        confirmed: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            ctx,
            cancel,
            confirmed,
            committed_at: Instant::now(),
        }
    }

    /// 1-based response number within the call
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn call_id(&self) -> &str {
        &self.ctx.call_id
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether the turn is confirmed right now
    pub fn is_confirmed(&self) -> bool {
        *self.confirmed.borrow()
    }

    /// Wait until the turn is confirmed. `false` when it is cancelled first.
    pub async fn confirmed(&self) -> bool {
        wait_confirmed(self.confirmed.clone(), &self.cancel).await
    }

    /// Speak sentences as they arrive until the sender side closes
    pub async fn speak(&self, mut sentences: mpsc::Receiver<String>) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let mut stream = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
            opened = self.ctx.synthesizer.open() => opened?,
        };
        let audio = match stream.take_audio() {
            Some(audio) => audio,
            None => {
                stream.close().await;
                return Err(PipelineError::Tts("audio channel unavailable".to_string()));
            }
        };

        let mut forwarder = tokio::spawn(forward_audio(
            self.ctx.clone(),
            self.cancel.clone(),
            self.confirmed.clone(),
            audio,
            self.ctx.synthesizer.output_format(),
            self.committed_at,
        ));

        let mut sent = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    stream.close().await;
                    forwarder.abort();
                    return Err(PipelineError::Cancelled);
                }
                sentence = sentences.recv() => match sentence {
                    Some(sentence) => {
                        if let Err(e) = stream.send_text(&sentence).await {
                            tracing::warn!(
                                call_id = %self.ctx.call_id,
                                error = %e,
                                "Synthesis send failed"
                            );
                            break;
                        }
                        sent += 1;
                    }
                    None => break,
                },
            }
        }

        if let Err(e) = stream.flush().await {
            tracing::warn!(call_id = %self.ctx.call_id, error = %e, "Synthesis flush failed");
        }

        let drained = tokio::select! {
            _ = self.cancel.cancelled() => None,
            joined = tokio::time::timeout(self.ctx.drain_timeout, &mut forwarder) => Some(joined),
        };
        stream.close().await;

        let forwarded = match drained {
            None => {
                forwarder.abort();
                return Err(PipelineError::Cancelled);
            }
            Some(Ok(Ok(forwarded))) => forwarded,
            Some(Ok(Err(e))) => {
                tracing::warn!(call_id = %self.ctx.call_id, error = %e, "Audio forwarder failed");
                0
            }
            Some(Err(_)) => {
                forwarder.abort();
                tracing::warn!(
                    call_id = %self.ctx.call_id,
                    timeout_secs = self.ctx.drain_timeout.as_secs(),
                    "Audio drain timed out, treating response as done"
                );
                0
            }
        };

        let _gate = self.ctx.gate.lock().await;
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let _ = self
            .ctx
            .outbound
            .send(OutboundMedia::Mark(format!("response-{}", self.id)))
            .await;
        self.ctx.set_state(TurnState::ListeningAccumulating);

        tracing::info!(
            call_id = %self.ctx.call_id,
            response = self.id,
            sentences = sent,
            chunks = forwarded,
            elapsed_ms = self.committed_at.elapsed().as_millis() as u64,
            "Response spoken"
        );
        Ok(())
    }
}

async fn wait_confirmed(mut confirmed: watch::Receiver<bool>, cancel: &CancellationToken) -> bool {
    loop {
        if *confirmed.borrow() {
            return true;
        }
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = confirmed.changed() => {
                if changed.is_err() {
                    return *confirmed.borrow() && !cancel.is_cancelled();
                }
            }
        }
    }
}

/// Forward synthesized audio in order, returning the chunk count
async fn forward_audio(
    ctx: Arc<CallContext>,
    cancel: CancellationToken,
    confirmed: watch::Receiver<bool>,
    mut audio: mpsc::Receiver<Vec<u8>>,
    format: AudioFormat,
    committed_at: Instant,
) -> usize {
    let mut forwarded = 0usize;

    while let Some(chunk) = audio.recv().await {
        if forwarded == 0 && !wait_confirmed(confirmed.clone(), &cancel).await {
            return forwarded;
        }

        let chunk = if format.is_telephony() {
            chunk
        } else {
            format.to_telephony(&chunk)
        };
        if chunk.is_empty() {
            continue;
        }

        let _gate = ctx.gate.lock().await;
        if cancel.is_cancelled() {
            return forwarded;
        }
        if forwarded == 0 {
            ctx.set_state(TurnState::Speaking);
            metrics::histogram!("voice_first_audio_latency_ms")
                .record(committed_at.elapsed().as_millis() as f64);
        }
        if ctx.outbound.send(OutboundMedia::Audio(chunk)).await.is_err() {
            return forwarded;
        }
        forwarded += 1;
    }

    forwarded
}
