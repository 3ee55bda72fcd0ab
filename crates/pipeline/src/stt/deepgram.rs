//! Deepgram streaming recognizer
//!
//! One websocket per call. A supervisor task owns the socket: it forwards
//! queued audio upstream, feeds upstream text frames through the
//! [`TurnAssembler`], and reconnects with bounded backoff when the socket
//! drops. Exhausting the reconnect budget emits [`SttEvent::Stopped`].

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use voice_gateway_config::constants::stt as stt_defaults;
use voice_gateway_config::TurnStrategy;

use super::{SpeechRecognizer, SttConfig, SttEvent, TurnAssembler};
use crate::PipelineError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_STREAM: &str = r#"{"type":"CloseStream"}"#;

/// Why the socket pump returned
enum PumpExit {
    /// Close requested or the event consumer went away
    Shutdown,
    /// Upstream dropped unexpectedly
    Dropped(String),
}

/// Streaming recognizer backed by Deepgram
pub struct DeepgramStreamer {
    config: SttConfig,
    events: mpsc::Sender<SttEvent>,
    audio_tx: Mutex<Option<mpsc::Sender<Vec<u8>>>>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DeepgramStreamer {
    pub fn new(config: SttConfig, events: mpsc::Sender<SttEvent>) -> Self {
        Self {
            config,
            events,
            audio_tx: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            shutdown: CancellationToken::new(),
            supervisor: Mutex::new(None),
        }
    }

    /// Upstream URL with the query parameters of the configured strategy
    pub fn listen_url(&self) -> String {
        listen_url(&self.config)
    }
}

fn listen_url(config: &SttConfig) -> String {
    match config.strategy {
        TurnStrategy::Endpointing => format!(
            "{}?encoding={}&sample_rate={}&channels=1&model={}&punctuate=true\
             &interim_results=true&endpointing={}&vad_events=true",
            config.endpoint,
            config.encoding,
            config.sample_rate,
            config.model,
            config.endpointing_ms,
        ),
        TurnStrategy::ModelTurn => {
            let model = if config.model.starts_with("flux") {
                config.model.as_str()
            } else {
                stt_defaults::FLUX_MODEL
            };
            format!(
                "{}?model={}&encoding={}&sample_rate={}&eager_eot_threshold={}",
                config.endpoint,
                model,
                config.encoding,
                config.sample_rate,
                config.eager_eot_threshold,
            )
        }
    }
}

async fn open_socket(config: &SttConfig) -> Result<Socket, PipelineError> {
    let mut request = listen_url(config).into_client_request()?;
    let auth = HeaderValue::from_str(&format!("Token {}", config.api_key))
        .map_err(|e| PipelineError::Connection(format!("invalid API key header: {}", e)))?;
    request.headers_mut().insert("Authorization", auth);

    let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}

#[async_trait]
impl SpeechRecognizer for DeepgramStreamer {
    async fn connect(&self) -> Result<(), PipelineError> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let socket = open_socket(&self.config).await.map_err(|e| {
            metrics::counter!("voice_errors_total", "component" => "stt").increment(1);
            tracing::error!(error = %e, "Transcription connect failed");
            e
        })?;

        let (audio_tx, audio_rx) = mpsc::channel(self.config.audio_queue);
        *self.audio_tx.lock() = Some(audio_tx);
        self.connected.store(true, Ordering::SeqCst);

        let supervisor = Supervisor {
            config: self.config.clone(),
            events: self.events.clone(),
            connected: self.connected.clone(),
            shutdown: self.shutdown.clone(),
            assembler: TurnAssembler::new(),
        };
        *self.supervisor.lock() = Some(tokio::spawn(supervisor.run(socket, audio_rx)));

        tracing::info!(
            encoding = %self.config.encoding,
            sample_rate = self.config.sample_rate,
            strategy = ?self.config.strategy,
            "Transcription stream connected"
        );
        Ok(())
    }

    fn send_audio(&self, audio: Vec<u8>) {
        if !self.connected.load(Ordering::Relaxed) {
            return;
        }
        if let Some(tx) = self.audio_tx.lock().as_ref() {
            // Full queue means upstream is stalled; dropping keeps the call live
            if tx.try_send(audio).is_err() {
                tracing::trace!("Transcription audio queue full, dropping chunk");
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.shutdown.cancel();
        self.connected.store(false, Ordering::SeqCst);
        self.audio_tx.lock().take();

        let handle = self.supervisor.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
                tracing::warn!("Transcription supervisor did not stop in time");
            }
        }
        tracing::info!("Transcription stream closed");
    }
}

struct Supervisor {
    config: SttConfig,
    events: mpsc::Sender<SttEvent>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
    assembler: TurnAssembler,
}

impl Supervisor {
    async fn run(mut self, mut socket: Socket, mut audio_rx: mpsc::Receiver<Vec<u8>>) {
        loop {
            match self.pump(&mut socket, &mut audio_rx).await {
                PumpExit::Shutdown => {
                    let _ = socket.send(Message::Text(CLOSE_STREAM.to_string())).await;
                    let _ = socket.close(None).await;
                    self.connected.store(false, Ordering::SeqCst);
                    return;
                }
                PumpExit::Dropped(reason) => {
                    self.connected.store(false, Ordering::SeqCst);
                    tracing::warn!(reason = %reason, "Transcription stream dropped");
                    match self.reconnect().await {
                        Some(fresh) => {
                            socket = fresh;
                            self.assembler.reset();
                            self.connected.store(true, Ordering::SeqCst);
                        }
                        None => return,
                    }
                }
            }
        }
    }

    async fn pump(
        &mut self,
        socket: &mut Socket,
        audio_rx: &mut mpsc::Receiver<Vec<u8>>,
    ) -> PumpExit {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return PumpExit::Shutdown,

                audio = audio_rx.recv() => match audio {
                    Some(chunk) => {
                        if let Err(e) = socket.send(Message::Binary(chunk)).await {
                            return PumpExit::Dropped(e.to_string());
                        }
                    }
                    None => return PumpExit::Shutdown,
                },

                frame = socket.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        for event in self.assembler.handle(&text) {
                            if self.events.send(event).await.is_err() {
                                return PumpExit::Shutdown;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return PumpExit::Dropped(format!("closed by upstream: {:?}", frame));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return PumpExit::Dropped(e.to_string()),
                    None => return PumpExit::Dropped("stream ended".to_string()),
                },
            }
        }
    }

    /// Retry until connected, the budget runs out, or shutdown
    async fn reconnect(&mut self) -> Option<Socket> {
        let policy = self.config.reconnect;

        for attempt in 1..=policy.max_attempts {
            metrics::counter!("voice_stt_reconnects_total").increment(1);
            if self
                .events
                .send(SttEvent::Reconnecting { attempt })
                .await
                .is_err()
            {
                return None;
            }

            let base = policy.delay(attempt);
            let jitter_ms = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
            let delay = base + Duration::from_millis(jitter_ms);

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            match open_socket(&self.config).await {
                Ok(socket) => {
                    tracing::info!(attempt, "Transcription stream reconnected");
                    return Some(socket);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transcription reconnect failed"
                    );
                }
            }
        }

        metrics::counter!("voice_errors_total", "component" => "stt").increment(1);
        tracing::error!(
            max_attempts = policy.max_attempts,
            "Transcription reconnects exhausted, stopping"
        );
        let _ = self.events.send(SttEvent::Stopped).await;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::ReconnectPolicy;
    use voice_gateway_config::SttSettings;

    fn config(strategy: TurnStrategy) -> SttConfig {
        let mut settings = SttSettings::default();
        settings.api_key = "test-key".to_string();
        settings.turn_strategy = strategy;
        SttConfig::from_settings(&settings)
    }

    #[test]
    fn test_endpointing_url() {
        let (tx, _rx) = mpsc::channel(8);
        let streamer = DeepgramStreamer::new(config(TurnStrategy::Endpointing), tx);
        let url = streamer.listen_url();
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("encoding=mulaw"));
        assert!(url.contains("sample_rate=8000"));
        assert!(url.contains("channels=1"));
        assert!(url.contains("interim_results=true"));
        assert!(url.contains("endpointing=300"));
        assert!(url.contains("vad_events=true"));
    }

    #[test]
    fn test_model_turn_url() {
        let (tx, _rx) = mpsc::channel(8);
        let streamer = DeepgramStreamer::new(config(TurnStrategy::ModelTurn), tx);
        let url = streamer.listen_url();
        assert!(url.starts_with("wss://api.deepgram.com/v2/listen?"));
        assert!(url.contains("model=flux-general-en"));
        assert!(url.contains("eager_eot_threshold=0.5"));
    }

    #[tokio::test]
    async fn test_audio_dropped_while_disconnected() {
        let (tx, _rx) = mpsc::channel(8);
        let streamer = DeepgramStreamer::new(config(TurnStrategy::Endpointing), tx);
        assert!(!streamer.is_connected());
        streamer.send_audio(vec![0xFF; 160]);
        streamer.close().await;
        assert!(!streamer.is_connected());
    }

    #[tokio::test]
    async fn test_dropped_stream_reconnects_then_stops() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Accept the first connection, then refuse every reconnect
        let upstream = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            drop(listener);
            let socket = tokio_tungstenite::accept_async(tcp).await.unwrap();
            drop(socket);
        });

        let (tx, mut rx) = mpsc::channel(16);
        let mut cfg = config(TurnStrategy::Endpointing);
        cfg.endpoint = format!("ws://{}/listen", addr);
        cfg.reconnect = ReconnectPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        };
        let streamer = DeepgramStreamer::new(cfg, tx);
        streamer.connect().await.unwrap();
        upstream.await.unwrap();

        let mut events = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                let stopped = event == SttEvent::Stopped;
                events.push(event);
                if stopped {
                    break;
                }
            }
        })
        .await
        .expect("reconnects exhausted in time");

        let mut expected: Vec<SttEvent> = (1..=5)
            .map(|attempt| SttEvent::Reconnecting { attempt })
            .collect();
        expected.push(SttEvent::Stopped);
        assert_eq!(events, expected);
        assert!(!streamer.is_connected());

        streamer.close().await;
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let (tx, _rx) = mpsc::channel(8);
        let mut cfg = config(TurnStrategy::Endpointing);
        cfg.endpoint = "ws://127.0.0.1:1/listen".to_string();
        let streamer = DeepgramStreamer::new(cfg, tx);
        assert!(streamer.connect().await.is_err());
        assert!(!streamer.is_connected());
    }
}
