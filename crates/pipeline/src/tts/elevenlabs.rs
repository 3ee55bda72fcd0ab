//! ElevenLabs websocket synthesis
//!
//! Protocol: a beginning-of-stream message carrying voice settings and the
//! key, then text messages, then an empty text as the flush marker. The
//! upstream answers with base64 `audio` messages until `isFinal`.

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use voice_gateway_core::AudioFormat;

use super::{SpeechSynthesizer, SynthesisStream, TtsConfig};
use crate::PipelineError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Deserialize)]
struct AudioMessage {
    #[serde(default)]
    audio: Option<String>,
    #[serde(default, rename = "isFinal")]
    is_final: Option<bool>,
    #[serde(default)]
    error: Option<String>,
}

/// Synthesizer backed by the ElevenLabs stream-input API
pub struct ElevenLabsSynthesizer {
    config: TtsConfig,
}

impl ElevenLabsSynthesizer {
    pub fn new(config: TtsConfig) -> Self {
        Self { config }
    }

    pub fn stream_url(&self) -> String {
        format!(
            "{}/{}/stream-input?model_id={}&output_format={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.voice_id,
            self.config.model_id,
            self.config.output_format,
        )
    }

    fn begin_message(&self) -> String {
        json!({
            "text": " ",
            "voice_settings": {
                "stability": self.config.stability,
                "similarity_boost": self.config.similarity_boost,
            },
            "xi_api_key": self.config.api_key,
        })
        .to_string()
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn open(&self) -> Result<Box<dyn SynthesisStream>, PipelineError> {
        let (socket, _response) = tokio_tungstenite::connect_async(self.stream_url())
            .await
            .map_err(|e| {
                metrics::counter!("voice_errors_total", "component" => "tts").increment(1);
                PipelineError::Tts(format!("connect failed: {}", e))
            })?;

        let (mut sink, stream) = socket.split();
        sink.send(Message::Text(self.begin_message())).await?;

        let (audio_tx, audio_rx) = mpsc::channel(64);
        let reader = tokio::spawn(read_audio(stream, audio_tx, self.config.receive_timeout));

        tracing::debug!(format = %self.config.output_format, "Synthesis stream opened");
        Ok(Box::new(ElevenLabsStream {
            sink: Some(sink),
            audio: Some(audio_rx),
            reader: Some(reader),
        }))
    }

    fn output_format(&self) -> AudioFormat {
        self.config.audio_format()
    }
}

async fn read_audio(
    mut stream: SplitStream<Socket>,
    audio_tx: mpsc::Sender<Vec<u8>>,
    receive_timeout: std::time::Duration,
) {
    let engine = base64::engine::general_purpose::STANDARD;
    let mut chunks = 0usize;

    loop {
        let frame = match tokio::time::timeout(receive_timeout, stream.next()).await {
            Ok(frame) => frame,
            Err(_) => {
                tracing::warn!(chunks, "Synthesis receive timed out");
                break;
            }
        };

        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                tracing::debug!(chunks, "Synthesis stream closed by upstream");
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, chunks, "Synthesis stream error");
                break;
            }
        };

        let message: AudioMessage = match serde_json::from_str(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable synthesis message");
                continue;
            }
        };

        if let Some(error) = message.error {
            tracing::warn!(error = %error, "Synthesis upstream reported an error");
            break;
        }

        if let Some(audio) = message.audio.filter(|a| !a.is_empty()) {
            match engine.decode(audio) {
                Ok(bytes) => {
                    chunks += 1;
                    if audio_tx.send(bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => tracing::debug!(error = %e, "Skipping undecodable audio chunk"),
            }
        }

        if message.is_final.unwrap_or(false) {
            tracing::debug!(chunks, "Synthesis complete");
            break;
        }
    }
}

struct ElevenLabsStream {
    sink: Option<SplitSink<Socket, Message>>,
    audio: Option<mpsc::Receiver<Vec<u8>>>,
    reader: Option<JoinHandle<()>>,
}

impl ElevenLabsStream {
    async fn send(&mut self, payload: serde_json::Value) -> Result<(), PipelineError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| PipelineError::Tts("stream closed".to_string()))?;
        sink.send(Message::Text(payload.to_string())).await?;
        Ok(())
    }
}

#[async_trait]
impl SynthesisStream for ElevenLabsStream {
    async fn send_text(&mut self, text: &str) -> Result<(), PipelineError> {
        self.send(json!({ "text": format!("{} ", text), "try_trigger_generation": true }))
            .await
    }

    async fn flush(&mut self) -> Result<(), PipelineError> {
        self.send(json!({ "text": "" })).await
    }

    fn take_audio(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.audio.take()
    }

    async fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
        self.audio.take();
    }
}

impl Drop for ElevenLabsStream {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
