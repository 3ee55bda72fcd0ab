//! A Twilio media stream driven over a real WebSocket

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use voice_gateway_agent::{VoiceAgent, VoiceAgentConfig};
use voice_gateway_config::Settings;
use voice_gateway_core::{EventPublisher, SessionEvent, SessionSource};
use voice_gateway_llm::DemoBackend;
use voice_gateway_persistence::{ConversationStore, InMemoryConversationStore};
use voice_gateway_pipeline::{DemoSynthesizer, PipelineError, SpeechRecognizer, SttEvent};
use voice_gateway_server::{create_router, AppState, RecognizerFactory};
use voice_gateway_tools::ToolRegistry;

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

impl RecordingPublisher {
    fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(SessionEvent::name).collect()
    }
}

/// Hears "hello charlotte" on the first audio chunk
struct ScriptedRecognizer {
    events: mpsc::Sender<SttEvent>,
    connected: AtomicBool,
    spoke: AtomicBool,
}

#[async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn connect(&self) -> Result<(), PipelineError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send_audio(&self, _audio: Vec<u8>) {
        if !self.spoke.swap(true, Ordering::SeqCst) {
            let _ = self
                .events
                .try_send(SttEvent::Utterance("hello charlotte".to_string()));
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

struct ScriptedRecognizers;

impl RecognizerFactory for ScriptedRecognizers {
    fn recognizer(&self, events: mpsc::Sender<SttEvent>) -> Arc<dyn SpeechRecognizer> {
        Arc::new(ScriptedRecognizer {
            events,
            connected: AtomicBool::new(false),
            spoke: AtomicBool::new(false),
        })
    }
}

async fn serve(max_calls: usize) -> (String, AppState, Arc<RecordingPublisher>) {
    let mut config = Settings::default();
    config.demo = true;
    config.server.max_calls = max_calls;

    let publisher = Arc::new(RecordingPublisher::default());
    let agent = Arc::new(VoiceAgent::new(
        Arc::new(DemoBackend::new()),
        Arc::new(ToolRegistry::new()),
        VoiceAgentConfig::default(),
    ));
    let state = AppState::new(
        config,
        Arc::new(InMemoryConversationStore::default()),
        agent,
        publisher.clone(),
    )
    .with_media(Arc::new(ScriptedRecognizers), Arc::new(DemoSynthesizer::new()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/twilio/media", addr), state, publisher)
}

fn start_message(call_sid: &str) -> Message {
    Message::Text(
        serde_json::json!({
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1",
            "start": {
                "streamSid": "MZ1",
                "callSid": call_sid,
                "customParameters": {"source": "twilio"}
            }
        })
        .to_string(),
    )
}

fn media_message() -> Message {
    Message::Text(
        serde_json::json!({
            "event": "media",
            "streamSid": "MZ1",
            "media": {"track": "inbound", "payload": "//////////8="}
        })
        .to_string(),
    )
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(3), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition reached in time");
}

#[tokio::test]
async fn test_call_is_answered_over_the_media_stream() {
    let (url, state, publisher) = serve(4).await;
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    socket
        .send(Message::Text(r#"{"event":"connected","protocol":"Call"}"#.to_string()))
        .await
        .unwrap();
    socket.send(start_message("CA-ws")).await.unwrap();
    socket.send(media_message()).await.unwrap();

    let mut audio_frames = 0;
    let mark = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let Some(Ok(Message::Text(text))) = socket.next().await else {
                panic!("media stream closed early");
            };
            let json: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(json["streamSid"], "MZ1");
            match json["event"].as_str() {
                Some("media") => audio_frames += 1,
                Some("mark") => return json["mark"]["name"].as_str().unwrap().to_string(),
                other => panic!("unexpected outbound event {:?}", other),
            }
        }
    })
    .await
    .expect("response mark in time");

    assert!(audio_frames >= 1);
    assert_eq!(mark, "response-1");
    assert_eq!(state.calls.count(), 1);
    assert!(state.calls.get("CA-ws").unwrap().session_id().is_some());

    // History is written once the turn is confirmed and spoken
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            let loaded = state
                .store
                .get_or_create("CA-ws", SessionSource::Phone)
                .await
                .unwrap();
            if loaded.history.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("turn persisted in time");

    socket
        .send(Message::Text(r#"{"event":"stop","streamSid":"MZ1"}"#.to_string()))
        .await
        .unwrap();

    wait_until(|| publisher.names().contains(&"call_end")).await;
    assert_eq!(state.calls.count(), 0);
    assert_eq!(publisher.names(), ["call_start", "call_end"]);

    let events = publisher.events.lock();
    assert!(matches!(
        &events[0],
        SessionEvent::CallStart { call_sid, .. } if call_sid == "CA-ws"
    ));
    assert!(matches!(
        &events[1],
        SessionEvent::CallEnd { messages: 2, .. }
    ));
}

#[tokio::test]
async fn test_call_over_capacity_is_dropped() {
    let (url, state, publisher) = serve(1).await;

    let (mut first, _) = tokio_tungstenite::connect_async(url.clone()).await.unwrap();
    first.send(start_message("CA-1")).await.unwrap();
    wait_until(|| state.calls.count() == 1).await;

    let (mut second, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    second.send(start_message("CA-2")).await.unwrap();

    // The server closes the rejected stream without answering
    let closed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match second.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "rejected stream left open");
    assert_eq!(state.calls.count(), 1);
    assert_eq!(publisher.names(), ["call_start"]);

    first.close(None).await.unwrap();
    wait_until(|| state.calls.count() == 0).await;
}
