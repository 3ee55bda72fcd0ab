//! Companion app socket
//!
//! `GET /app/ws?token=...` carries typed turns and push-to-talk audio from
//! the app. Each reply goes back as text, then as base64 audio chunks in
//! the app's output format, with status frames around the work.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use voice_gateway_agent::ConversationSession;
use voice_gateway_pipeline::{SpeechRecognizer, SttEvent};

use crate::state::AppState;
use crate::twilio::constant_time_compare;
use crate::ServerError;

/// Recognizer events buffered ahead of the socket loop
const STT_EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct AppQuery {
    #[serde(default)]
    pub token: String,
}

/// Client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppInbound {
    Text {
        #[serde(default)]
        text: String,
    },
    AudioStart,
    AudioData {
        #[serde(default)]
        data: String,
    },
    AudioStop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppStatus {
    Listening,
    Thinking,
    Tool,
    Speaking,
    Idle,
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

/// Server to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppFrame<'a> {
    History {
        messages: Vec<HistoryEntry<'a>>,
    },
    Transcript {
        text: &'a str,
        is_final: bool,
    },
    Status {
        status: AppStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool: Option<&'a str>,
    },
    Response {
        text: &'a str,
    },
    Audio {
        data: String,
        #[serde(rename = "final")]
        is_final: bool,
    },
    Error {
        message: &'a str,
    },
}

impl AppFrame<'_> {
    fn status(status: AppStatus) -> Self {
        AppFrame::Status { status, tool: None }
    }
}

type AppSink = SplitSink<WebSocket, Message>;

/// Socket write failed; the client is gone
struct Disconnected;

async fn send(sink: &mut AppSink, frame: AppFrame<'_>) -> Result<(), Disconnected> {
    let text = serde_json::to_string(&frame).map_err(|_| Disconnected)?;
    sink.send(Message::Text(text)).await.map_err(|_| Disconnected)
}

/// `GET /app/ws`
pub async fn app_socket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<AppQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ServerError> {
    if !state.config.app.enabled {
        return Err(ServerError::NotFound);
    }
    Ok(ws.on_upgrade(move |socket| handle_app_socket(socket, state, query.token)))
}

fn authorized(expected: &str, token: &str) -> bool {
    expected.is_empty() || constant_time_compare(expected.as_bytes(), token.as_bytes())
}

/// Open push-to-talk recording
struct Recording {
    recognizer: Arc<dyn SpeechRecognizer>,
    chunks: u64,
}

async fn handle_app_socket(socket: WebSocket, state: AppState, token: String) {
    let (mut sink, mut stream) = socket.split();

    if !authorized(&state.config.app.auth_token, &token) {
        metrics::counter!("voice_errors_total", "component" => "app_auth").increment(1);
        tracing::warn!("App client rejected: bad token");
        let _ = send(&mut sink, AppFrame::Error { message: "Unauthorized" }).await;
        let _ = sink.close().await;
        return;
    }

    let mut session = match state.text.app_session(&token).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "App session load failed");
            let _ = send(&mut sink, AppFrame::Error { message: "Session unavailable" }).await;
            let _ = sink.close().await;
            return;
        }
    };
    tracing::info!(
        session_id = %session.id(),
        history = session.message_count(),
        "App client connected"
    );

    if send(&mut sink, history_frame(&session, state.config.app.history_messages))
        .await
        .is_err()
    {
        return;
    }

    let mut recording: Option<Recording> = None;
    let result = serve_client(&state, &mut sink, &mut stream, &mut session, &mut recording).await;

    if let Some(recording) = recording {
        recording.recognizer.close().await;
    }
    if result.is_err() {
        tracing::debug!(session_id = %session.id(), "App socket write failed");
    }
    tracing::info!(
        session_id = %session.id(),
        messages = session.message_count(),
        "App client disconnected"
    );
}

/// Read loop for one authorized client. Returns when the client leaves.
async fn serve_client(
    state: &AppState,
    sink: &mut AppSink,
    stream: &mut SplitStream<WebSocket>,
    session: &mut ConversationSession,
    recording: &mut Option<Recording>,
) -> Result<(), Disconnected> {
    let mut stt_events: Option<mpsc::Receiver<SttEvent>> = None;

    loop {
        tokio::select! {
            message = stream.next() => {
                let inbound = match message {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AppInbound>(&text) {
                            Ok(inbound) => inbound,
                            Err(e) => {
                                tracing::debug!(error = %e, "Unparseable app message");
                                continue;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(audio))) => {
                        if let Some(recording) = recording.as_mut() {
                            recording.forward(audio);
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "App socket read failed");
                        return Ok(());
                    }
                };

                match inbound {
                    AppInbound::Text { text } => {
                        let text = text.trim();
                        if !text.is_empty() {
                            run_turn(state, sink, session, text).await?;
                        }
                    }
                    AppInbound::AudioStart => {
                        if let Some(previous) = recording.take() {
                            previous.recognizer.close().await;
                        }
                        let (tx, rx) = mpsc::channel(STT_EVENT_BUFFER);
                        let recognizer = state.recognizers.app_recognizer(tx);
                        match recognizer.connect().await {
                            Ok(()) => {
                                *recording = Some(Recording { recognizer, chunks: 0 });
                                stt_events = Some(rx);
                                send(sink, AppFrame::status(AppStatus::Listening)).await?;
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "App transcription connect failed");
                                let message = "Transcription unavailable";
                                send(sink, AppFrame::Error { message }).await?;
                            }
                        }
                    }
                    AppInbound::AudioData { data } => {
                        let Some(recording) = recording.as_mut() else { continue };
                        match BASE64.decode(data.as_bytes()) {
                            Ok(audio) => recording.forward(audio),
                            Err(e) => tracing::debug!(error = %e, "Undecodable app audio"),
                        }
                    }
                    AppInbound::AudioStop => {
                        // Events already in flight still drain below
                        if let Some(recording) = recording.take() {
                            tracing::debug!(chunks = recording.chunks, "App recording stopped");
                            recording.recognizer.close().await;
                        }
                    }
                    AppInbound::Unknown => {}
                }
            }
            event = next_event(stt_events.as_mut()) => {
                match event {
                    Some(SttEvent::Transcript { text, is_final }) => {
                        send(sink, AppFrame::Transcript { text: &text, is_final }).await?;
                    }
                    Some(SttEvent::Utterance(text)) => {
                        let text = text.trim();
                        if !text.is_empty() {
                            run_turn(state, sink, session, text).await?;
                        }
                    }
                    Some(SttEvent::Stopped) | None => stt_events = None,
                    Some(_) => {}
                }
            }
        }
    }
}

async fn next_event(events: Option<&mut mpsc::Receiver<SttEvent>>) -> Option<SttEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

impl Recording {
    fn forward(&mut self, audio: Vec<u8>) {
        if audio.is_empty() {
            return;
        }
        self.chunks += 1;
        self.recognizer.send_audio(audio);
    }
}

fn history_frame(session: &ConversationSession, limit: usize) -> AppFrame<'_> {
    let start = session.history.len().saturating_sub(limit);
    AppFrame::History {
        messages: session.history[start..]
            .iter()
            .map(|m| HistoryEntry {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
    }
}

/// Answer one utterance: status, reply text, then the spoken reply
async fn run_turn(
    state: &AppState,
    sink: &mut AppSink,
    session: &mut ConversationSession,
    text: &str,
) -> Result<(), Disconnected> {
    tracing::info!(session_id = %session.id(), text = %text, "App turn");
    send(sink, AppFrame::status(AppStatus::Thinking)).await?;

    let (tools_tx, mut tools_rx) = mpsc::unbounded_channel::<String>();
    let reply = {
        let reply = state.text.app_reply(session, text, Some(tools_tx));
        tokio::pin!(reply);
        loop {
            tokio::select! {
                reply = &mut reply => break reply,
                Some(tool) = tools_rx.recv() => {
                    let frame = AppFrame::Status { status: AppStatus::Tool, tool: Some(&tool) };
                    send(sink, frame).await?;
                }
            }
        }
    };
    while let Ok(tool) = tools_rx.try_recv() {
        send(sink, AppFrame::Status { status: AppStatus::Tool, tool: Some(&tool) }).await?;
    }

    let reply = match reply {
        Ok(reply) => reply,
        Err(e) => {
            metrics::counter!("voice_errors_total", "component" => "app").increment(1);
            tracing::error!(session_id = %session.id(), error = %e, "App turn failed");
            send(sink, AppFrame::Error { message: "Something went wrong" }).await?;
            return send(sink, AppFrame::status(AppStatus::Idle)).await;
        }
    };

    send(sink, AppFrame::Response { text: &reply }).await?;
    send(sink, AppFrame::status(AppStatus::Speaking)).await?;
    speak(state, sink, &reply).await?;
    send(sink, AppFrame::status(AppStatus::Idle)).await
}

/// Stream the reply's audio, always ending with a final empty chunk
async fn speak(state: &AppState, sink: &mut AppSink, reply: &str) -> Result<(), Disconnected> {
    let drain_timeout = Duration::from_secs(state.config.tts.drain_timeout_secs);

    match state.app_synthesizer.open().await {
        Ok(mut stream) => {
            let prepared = match stream.send_text(reply).await {
                Ok(()) => stream.flush().await,
                Err(e) => Err(e),
            };
            if let Err(e) = prepared {
                tracing::warn!(error = %e, "App synthesis failed");
            } else if let Some(mut audio) = stream.take_audio() {
                let drained = tokio::time::timeout(drain_timeout, async {
                    while let Some(chunk) = audio.recv().await {
                        let data = BASE64.encode(&chunk);
                        send(sink, AppFrame::Audio { data, is_final: false }).await?;
                    }
                    Ok::<(), Disconnected>(())
                })
                .await;
                match drained {
                    Ok(result) => result?,
                    Err(_) => tracing::warn!("App synthesis did not finish in time"),
                }
            }
            stream.close().await;
        }
        Err(e) => {
            metrics::counter!("voice_errors_total", "component" => "app_tts").increment(1);
            tracing::warn!(error = %e, "App synthesis unavailable");
        }
    }

    send(
        sink,
        AppFrame::Audio {
            data: String::new(),
            is_final: true,
        },
    )
    .await
}
