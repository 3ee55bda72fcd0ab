//! Twilio media stream bridge
//!
//! One WebSocket per call. Inbound mu-law frames go to the call's
//! recognizer; the turn controller's outbound media (audio, clear, mark)
//! is serialized back onto the socket by a writer task.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use voice_gateway_agent::{CallConversation, ConversationSession};
use voice_gateway_config::{AppSettings, SttSettings};
use voice_gateway_core::{unix_timestamp, SessionEvent, SessionSource};
use voice_gateway_pipeline::{
    ControllerExit, DeepgramStreamer, DemoRecognizer, OutboundMedia, SpeechRecognizer, SttConfig,
    SttEvent, TurnController,
};

use crate::session::CallSession;
use crate::state::AppState;
use crate::twilio::{outbound_message, StartMeta, StreamEvent};
use crate::ServerError;

/// Inbound chunks between progress log lines
const CHUNK_LOG_INTERVAL: u64 = 500;

/// Recognizer events buffered ahead of the controller
const STT_EVENT_BUFFER: usize = 64;

/// Outbound media buffered ahead of the socket writer
const OUTBOUND_BUFFER: usize = 256;

/// Ceiling on controller and writer teardown
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens one recognizer per call or app recording
pub trait RecognizerFactory: Send + Sync {
    /// 8kHz mu-law call audio
    fn recognizer(&self, events: mpsc::Sender<SttEvent>) -> Arc<dyn SpeechRecognizer>;

    /// Push-to-talk audio from the companion app
    fn app_recognizer(&self, events: mpsc::Sender<SttEvent>) -> Arc<dyn SpeechRecognizer> {
        self.recognizer(events)
    }
}

/// Deepgram streaming recognizers
pub struct DeepgramRecognizers {
    call: SttConfig,
    app: SttConfig,
}

impl DeepgramRecognizers {
    pub fn from_settings(settings: &SttSettings, app: &AppSettings) -> Self {
        let call = SttConfig::from_settings(settings);
        let app = SttConfig {
            encoding: app.encoding.clone(),
            sample_rate: app.sample_rate,
            ..call.clone()
        };
        Self { call, app }
    }
}

impl RecognizerFactory for DeepgramRecognizers {
    fn recognizer(&self, events: mpsc::Sender<SttEvent>) -> Arc<dyn SpeechRecognizer> {
        Arc::new(DeepgramStreamer::new(self.call.clone(), events))
    }

    fn app_recognizer(&self, events: mpsc::Sender<SttEvent>) -> Arc<dyn SpeechRecognizer> {
        Arc::new(DeepgramStreamer::new(self.app.clone(), events))
    }
}

/// Offline recognizers for demo mode
pub struct DemoRecognizers;

impl RecognizerFactory for DemoRecognizers {
    fn recognizer(&self, events: mpsc::Sender<SttEvent>) -> Arc<dyn SpeechRecognizer> {
        Arc::new(DemoRecognizer::new(events))
    }
}

/// `GET /twilio/media`
pub async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_media_stream(socket, state))
}

/// Everything one started call owns
struct ActiveCall {
    session: Arc<CallSession>,
    conversation: Arc<CallConversation>,
    recognizer: Arc<dyn SpeechRecognizer>,
    /// Stops the turn controller
    shutdown: CancellationToken,
    /// Cancelled when the controller exits on its own
    ended: CancellationToken,
    controller: JoinHandle<ControllerExit>,
    writer: JoinHandle<()>,
    chunks: u64,
}

type WsSink = SplitSink<WebSocket, Message>;

async fn handle_media_stream(socket: WebSocket, state: AppState) {
    let (sink, mut stream) = socket.split();
    let mut sink = Some(sink);
    let mut call: Option<ActiveCall> = None;

    loop {
        tokio::select! {
            message = stream.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("Media stream closed");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Media stream read failed");
                        break;
                    }
                };

                let event = match serde_json::from_str::<StreamEvent>(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::debug!(error = %e, "Unparseable media stream message");
                        continue;
                    }
                };

                match event {
                    StreamEvent::Connected { protocol } => {
                        tracing::info!(protocol = ?protocol, "Twilio stream connected");
                    }
                    StreamEvent::Start { start } => {
                        if call.is_some() {
                            tracing::warn!(call_sid = %start.call_sid, "Duplicate start ignored");
                            continue;
                        }
                        let Some(sink) = sink.take() else { continue };
                        match start_call(&state, start, sink).await {
                            Ok(active) => call = Some(active),
                            Err(e) => {
                                metrics::counter!("voice_errors_total", "component" => "media")
                                    .increment(1);
                                tracing::error!(error = %e, "Call setup failed");
                                break;
                            }
                        }
                    }
                    StreamEvent::Media { media } => {
                        if let Some(call) = call.as_mut() {
                            call.forward_audio(media.audio());
                        }
                    }
                    StreamEvent::Mark { mark } => {
                        tracing::debug!(mark = %mark.name, "Playback reached mark");
                    }
                    StreamEvent::Stop { .. } => {
                        tracing::info!("Twilio stream stopped");
                        break;
                    }
                    StreamEvent::Unknown => {}
                }
            }
            reason = call_over(call.as_ref()) => {
                tracing::info!(reason, "Ending call");
                break;
            }
        }
    }

    if let Some(call) = call {
        call.finish(&state).await;
    }
}

/// Resolves when a started call must end without a stop from Twilio
async fn call_over(call: Option<&ActiveCall>) -> &'static str {
    match call {
        Some(call) => {
            let hangup = call.session.hangup_token();
            tokio::select! {
                _ = hangup.cancelled() => "evicted",
                _ = call.ended.cancelled() => "pipeline stopped",
            }
        }
        None => std::future::pending().await,
    }
}

/// Register the call, load its conversation, connect transcription and
/// start the turn controller
async fn start_call(
    state: &AppState,
    start: StartMeta,
    sink: WsSink,
) -> Result<ActiveCall, ServerError> {
    let StartMeta {
        stream_sid,
        call_sid,
        custom_parameters,
    } = start;
    tracing::info!(
        call_sid = %call_sid,
        stream_sid = %stream_sid,
        source = custom_parameters.get("source").map(String::as_str).unwrap_or("unknown"),
        "Stream started"
    );

    let session = state.calls.register(&call_sid, &stream_sid)?;

    let loaded = match state.store.get_or_create(&call_sid, SessionSource::Phone).await {
        Ok(loaded) => loaded,
        Err(e) => {
            state.calls.remove(&session);
            return Err(e.into());
        }
    };
    let conversation_session = ConversationSession::from(loaded);
    session.set_session_id(conversation_session.id());
    tracing::info!(
        call_sid = %call_sid,
        session_id = %conversation_session.id(),
        history = conversation_session.message_count(),
        "Conversation loaded"
    );

    let (events_tx, events_rx) = mpsc::channel(STT_EVENT_BUFFER);
    let recognizer = state.recognizers.recognizer(events_tx);
    if let Err(e) = recognizer.connect().await {
        state.calls.remove(&session);
        return Err(ServerError::Internal(format!("transcription connect failed: {}", e)));
    }

    let conversation = Arc::new(CallConversation::new(
        conversation_session,
        state.agent.clone(),
        state.store.clone(),
        state.publisher.clone(),
        state.conversation_config(),
    ));

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(write_outbound(sink, stream_sid.clone(), outbound_rx));

    let controller = TurnController::new(
        call_sid.clone(),
        conversation.clone(),
        state.synthesizer.clone(),
        outbound_tx,
        events_rx,
        state.controller_config(),
    );
    let shutdown = controller.shutdown_token();
    let ended = CancellationToken::new();
    let controller = tokio::spawn({
        let ended = ended.clone();
        let call_sid = call_sid.clone();
        async move {
            let exit = controller.run().await;
            tracing::info!(call_sid = %call_sid, exit = ?exit, "Turn controller stopped");
            ended.cancel();
            exit
        }
    });

    state.publisher.publish(SessionEvent::CallStart {
        call_sid,
        timestamp: unix_timestamp(),
    });

    Ok(ActiveCall {
        session,
        conversation,
        recognizer,
        shutdown,
        ended,
        controller,
        writer,
        chunks: 0,
    })
}

/// Serialize outbound media onto the socket until the controller drops its sender
async fn write_outbound(
    mut sink: WsSink,
    stream_sid: String,
    mut outbound: mpsc::Receiver<OutboundMedia>,
) {
    while let Some(media) = outbound.recv().await {
        let message = outbound_message(&stream_sid, media);
        if let Err(e) = sink.send(Message::Text(message)).await {
            tracing::debug!(stream_sid = %stream_sid, error = %e, "Media stream write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

impl ActiveCall {
    fn forward_audio(&mut self, audio: Vec<u8>) {
        if audio.is_empty() {
            return;
        }
        self.chunks += 1;
        if self.chunks == 1 || self.chunks % CHUNK_LOG_INTERVAL == 0 {
            tracing::info!(
                call_sid = %self.session.call_sid(),
                chunks = self.chunks,
                bytes = audio.len(),
                stt_connected = self.recognizer.is_connected(),
                "Inbound audio"
            );
        }
        self.session.touch();
        self.recognizer.send_audio(audio);
    }

    /// Stop the pipeline, evict the call and publish its end
    async fn finish(self, state: &AppState) {
        let call_sid = self.session.call_sid().to_string();

        self.shutdown.cancel();
        match tokio::time::timeout(TEARDOWN_TIMEOUT, self.controller).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::error!(call_sid = %call_sid, error = %e, "Turn controller panicked")
            }
            Err(_) => tracing::warn!(call_sid = %call_sid, "Turn controller did not stop in time"),
        }
        self.recognizer.close().await;

        let mut writer = self.writer;
        if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut writer).await.is_err() {
            writer.abort();
        }

        state.calls.remove(&self.session);

        let messages = self.conversation.message_count().await;
        state.publisher.publish(SessionEvent::CallEnd {
            session_id: self.conversation.session_id().to_string(),
            messages,
            timestamp: unix_timestamp(),
        });
        tracing::info!(
            call_sid = %call_sid,
            chunks = self.chunks,
            messages,
            duration_secs = self.session.age().as_secs(),
            "Call ended"
        );
    }
}
