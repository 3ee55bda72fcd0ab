//! Offline recognizer for demo mode
//!
//! Never opens a socket. Utterances are injected by hand, either a given
//! text or the next canned phrase.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::{SpeechRecognizer, SttEvent};
use crate::PipelineError;

const DEMO_PHRASES: [&str; 3] = [
    "Hello Charlotte, what can you do?",
    "Take a note: remember to check the compressor readings tomorrow.",
    "What notes do I have?",
];

pub struct DemoRecognizer {
    events: mpsc::Sender<SttEvent>,
    connected: AtomicBool,
    audio_chunks: AtomicU64,
    next_phrase: Mutex<usize>,
}

impl DemoRecognizer {
    pub fn new(events: mpsc::Sender<SttEvent>) -> Self {
        Self {
            events,
            connected: AtomicBool::new(false),
            audio_chunks: AtomicU64::new(0),
            next_phrase: Mutex::new(0),
        }
    }

    /// Audio chunks received while connected
    pub fn audio_chunks(&self) -> u64 {
        self.audio_chunks.load(Ordering::Relaxed)
    }

    /// Emit a confirmed utterance, cycling the canned phrases when `text` is None
    pub async fn simulate_utterance(&self, text: Option<&str>) -> Result<String, PipelineError> {
        let text = match text {
            Some(text) => text.to_string(),
            None => {
                let mut index = self.next_phrase.lock();
                let phrase = DEMO_PHRASES[*index % DEMO_PHRASES.len()];
                *index += 1;
                phrase.to_string()
            }
        };

        tracing::info!(text = %text, "Demo utterance");
        self.emit(SttEvent::Transcript {
            text: text.clone(),
            is_final: true,
        })
        .await?;
        self.emit(SttEvent::Utterance(text.clone())).await?;
        Ok(text)
    }

    async fn emit(&self, event: SttEvent) -> Result<(), PipelineError> {
        self.events
            .send(event)
            .await
            .map_err(|_| PipelineError::ChannelClosed)
    }
}

#[async_trait]
impl SpeechRecognizer for DemoRecognizer {
    async fn connect(&self) -> Result<(), PipelineError> {
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!("Demo transcription stream ready");
        Ok(())
    }

    fn send_audio(&self, _audio: Vec<u8>) {
        if self.connected.load(Ordering::Relaxed) {
            self.audio_chunks.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_canned_phrases_cycle() {
        let (tx, mut rx) = mpsc::channel(16);
        let recognizer = DemoRecognizer::new(tx);
        recognizer.connect().await.unwrap();

        for expected in DEMO_PHRASES.iter().chain(DEMO_PHRASES.iter().take(1)) {
            let text = recognizer.simulate_utterance(None).await.unwrap();
            assert_eq!(&text, expected);
            assert!(matches!(rx.recv().await, Some(SttEvent::Transcript { .. })));
            assert_eq!(rx.recv().await, Some(SttEvent::Utterance(text)));
        }
    }

    #[tokio::test]
    async fn test_audio_counted_only_when_connected() {
        let (tx, _rx) = mpsc::channel(4);
        let recognizer = DemoRecognizer::new(tx);
        recognizer.send_audio(vec![0; 160]);
        recognizer.connect().await.unwrap();
        recognizer.send_audio(vec![0; 160]);
        recognizer.send_audio(vec![0; 160]);
        assert_eq!(recognizer.audio_chunks(), 2);
    }
}
