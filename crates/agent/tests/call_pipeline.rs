//! Calls driven end to end: recognizer events in, agent reply spoken out

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use voice_gateway_agent::{
    CallConversation, CallConversationConfig, ConversationSession, VoiceAgent, VoiceAgentConfig,
};
use voice_gateway_core::{
    AudioFormat, CallMode, EventPublisher, Role, SessionEvent, SessionSource,
};
use voice_gateway_llm::{
    ContentBlock, LlmBackend, LlmError, MessageRequest, MessageResponse, StopReason, Usage,
};
use voice_gateway_persistence::{ConversationStore, InMemoryConversationStore};
use voice_gateway_pipeline::{
    OutboundMedia, PipelineError, SpeechSynthesizer, SttEvent, SynthesisStream, TurnController,
    TurnControllerConfig, TurnState,
};
use voice_gateway_tools::ToolRegistry;

const WEATHER_REPLY: &str = "It is sunny and warm.";
const SUMMARY_REPLY: &str = "You agreed to ship on friday.";

/// Streams a fixed reply word by word; summaries get their own reply
struct WeatherBackend;

#[async_trait]
impl LlmBackend for WeatherBackend {
    async fn create_message(
        &self,
        request: &MessageRequest,
        deltas: Option<mpsc::Sender<String>>,
    ) -> Result<MessageResponse, LlmError> {
        let last = request.messages.last().map(|m| m.text()).unwrap_or_default();
        let reply = if last.contains("Summarize this meeting") {
            SUMMARY_REPLY
        } else {
            WEATHER_REPLY
        };
        if let Some(tx) = deltas {
            for word in reply.split_inclusive(' ') {
                let _ = tx.send(word.to_string()).await;
            }
        }
        Ok(MessageResponse {
            content: vec![ContentBlock::Text {
                text: reply.to_string(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: Usage::default(),
        })
    }

    fn model_name(&self) -> &str {
        "weather"
    }
}

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<SessionEvent>>,
}

impl EventPublisher for RecordingPublisher {
    fn publish(&self, event: SessionEvent) {
        self.events.lock().push(event);
    }
}

/// One silent chunk per sentence; records what it was asked to say
#[derive(Default)]
struct RecordingSynthesizer {
    texts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynthesizer {
    async fn open(&self) -> Result<Box<dyn SynthesisStream>, PipelineError> {
        let (tx, rx) = mpsc::channel(16);
        Ok(Box::new(RecordingStream {
            texts: self.texts.clone(),
            tx: Some(tx),
            rx: Some(rx),
        }))
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::TELEPHONY
    }
}

struct RecordingStream {
    texts: Arc<Mutex<Vec<String>>>,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
}

#[async_trait]
impl SynthesisStream for RecordingStream {
    async fn send_text(&mut self, text: &str) -> Result<(), PipelineError> {
        self.texts.lock().push(text.to_string());
        if let Some(tx) = &self.tx {
            let _ = tx.send(vec![0xFF; 160]).await;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), PipelineError> {
        self.tx.take();
        Ok(())
    }

    fn take_audio(&mut self) -> Option<mpsc::Receiver<Vec<u8>>> {
        self.rx.take()
    }

    async fn close(&mut self) {
        self.tx.take();
    }
}

struct Call {
    events: mpsc::Sender<SttEvent>,
    outbound: mpsc::Receiver<OutboundMedia>,
    state: watch::Receiver<TurnState>,
    shutdown: CancellationToken,
    conversation: Arc<CallConversation>,
    store: Arc<InMemoryConversationStore>,
    publisher: Arc<RecordingPublisher>,
    texts: Arc<Mutex<Vec<String>>>,
}

async fn start_call() -> Call {
    let store = Arc::new(InMemoryConversationStore::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let agent = Arc::new(VoiceAgent::new(
        Arc::new(WeatherBackend),
        Arc::new(ToolRegistry::new()),
        VoiceAgentConfig::default(),
    ));

    let session: ConversationSession = store
        .get_or_create("CA-e2e", SessionSource::Phone)
        .await
        .unwrap()
        .into();
    let conversation = Arc::new(CallConversation::new(
        session,
        agent,
        store.clone(),
        publisher.clone(),
        CallConversationConfig::default(),
    ));

    let synthesizer = RecordingSynthesizer::default();
    let texts = synthesizer.texts.clone();
    let (events_tx, events_rx) = mpsc::channel(32);
    let (outbound_tx, outbound_rx) = mpsc::channel(256);
    let controller = TurnController::new(
        "CA-e2e",
        conversation.clone(),
        Arc::new(synthesizer),
        outbound_tx,
        events_rx,
        TurnControllerConfig {
            drain_timeout: Duration::from_secs(2),
            unwind_timeout: Duration::from_secs(1),
        },
    );
    let state = controller.subscribe();
    let shutdown = controller.shutdown_token();
    tokio::spawn(controller.run());

    Call {
        events: events_tx,
        outbound: outbound_rx,
        state,
        shutdown,
        conversation,
        store,
        publisher,
        texts,
    }
}

async fn utter(call: &Call, text: &str) {
    call.events
        .send(SttEvent::Utterance(text.to_string()))
        .await
        .unwrap();
}

/// Collect media until the response mark
async fn until_mark(outbound: &mut mpsc::Receiver<OutboundMedia>) -> (usize, String) {
    let mut chunks = 0;
    loop {
        let media = tokio::time::timeout(Duration::from_secs(2), outbound.recv())
            .await
            .expect("media in time")
            .expect("outbound open");
        match media {
            OutboundMedia::Audio(_) => chunks += 1,
            OutboundMedia::Mark(name) => return (chunks, name),
            OutboundMedia::Clear => panic!("unexpected clear"),
        }
    }
}

async fn wait_messages(call: &Call, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while call.conversation.message_count().await < count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("messages persisted in time");
}

#[tokio::test]
async fn test_utterance_is_answered_spoken_and_persisted() {
    let mut call = start_call().await;
    utter(&call, "what's the weather").await;

    let (chunks, mark) = until_mark(&mut call.outbound).await;
    assert!(chunks >= 1);
    assert_eq!(mark, "response-1");
    assert_eq!(call.texts.lock().join(" "), WEATHER_REPLY);

    wait_messages(&call, 2).await;
    let loaded = call
        .store
        .get_or_create("CA-e2e", SessionSource::Phone)
        .await
        .unwrap();
    assert_eq!(loaded.history.len(), 2);
    assert_eq!(loaded.history[0].role, Role::User);
    assert_eq!(loaded.history[0].content, "what's the weather");
    assert_eq!(loaded.history[1].content, WEATHER_REPLY);

    call.state
        .wait_for(|s| *s == TurnState::ListeningAccumulating)
        .await
        .unwrap();
    call.shutdown.cancel();
}

#[tokio::test]
async fn test_minutes_are_silent_then_summarized_into_a_note() {
    let mut call = start_call().await;

    utter(&call, "Charlotte, take minutes please").await;
    let (_, mark) = until_mark(&mut call.outbound).await;
    assert_eq!(mark, "response-1");
    wait_messages(&call, 2).await;
    assert_eq!(call.conversation.mode().await, CallMode::Minutes);

    utter(&call, "We will ship on friday").await;
    let silent = tokio::time::timeout(Duration::from_millis(150), call.outbound.recv()).await;
    assert!(silent.is_err(), "minutes entry was answered: {:?}", silent);

    utter(&call, "okay stop minutes").await;
    let (_, mark) = until_mark(&mut call.outbound).await;
    assert_eq!(mark, "response-3");
    wait_messages(&call, 4).await;
    assert_eq!(call.conversation.mode().await, CallMode::Conversational);

    let notes = call.store.search_notes("Meeting Minutes", 10).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert!(notes[0].content.contains(SUMMARY_REPLY));
    assert!(notes[0].content.contains("] We will ship on friday"));
    assert!(notes[0].content.starts_with("Duration: 0 minutes | 1 entries"));

    let names: Vec<&str> = call
        .publisher
        .events
        .lock()
        .iter()
        .map(SessionEvent::name)
        .collect();
    assert_eq!(names, ["minutes_start", "minutes_end"]);

    call.shutdown.cancel();
}

#[tokio::test]
async fn test_withdrawn_eager_turn_leaves_no_history() {
    let mut call = start_call().await;

    call.events
        .send(SttEvent::EagerUtterance("what's the".to_string()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    call.events.send(SttEvent::UtteranceCancelled).await.unwrap();

    let leaked = tokio::time::timeout(Duration::from_millis(150), call.outbound.recv()).await;
    assert!(leaked.is_err(), "speculative audio leaked: {:?}", leaked);
    assert_eq!(call.conversation.message_count().await, 0);

    call.shutdown.cancel();
}
