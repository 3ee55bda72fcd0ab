//! Offline synthesizer: one block of mu-law silence per sentence

use async_trait::async_trait;
use tokio::sync::mpsc;
use voice_gateway_core::audio::mulaw_silence;
use voice_gateway_core::AudioFormat;

use super::{SpeechSynthesizer, SynthesisStream};
use crate::PipelineError;

pub struct DemoSynthesizer {
    chunk_ms: u32,
}

impl DemoSynthesizer {
    pub fn new() -> Self {
        Self { chunk_ms: 20 }
    }
}

impl Default for DemoSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for DemoSynthesizer {
    async fn open(&self) -> Result<Box<dyn SynthesisStream>, PipelineError> {
        let (tx, rx) = mpsc::channel(64);
        Ok(Box::new(DemoStream {
            tx: Some(tx),
            rx: Some(rx),
            chunk_ms: self.chunk_ms,
        }))
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::TELEPHONY
    }
}

struct DemoStream {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
    chunk_ms: u32,
}

#[async_trait]
impl SynthesisStream for DemoStream {
    async fn send_text(&mut self, text: &str) -> Result<(), PipelineError> {
        tracing::debug!(text = %text, "Demo synthesis");
        if let Some(tx) = &self.tx {
            tx.send(mulaw_silence(self.chunk_ms))
                .await
                .map_err(|_| PipelineError::ChannelClosed)?;
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
        self.rx.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_chunk_per_sentence_then_end() {
        let synthesizer = DemoSynthesizer::new();
        let mut stream = synthesizer.open().await.unwrap();
        let mut audio = stream.take_audio().unwrap();
        assert!(stream.take_audio().is_none());

        stream.send_text("First.").await.unwrap();
        stream.send_text("Second.").await.unwrap();
        stream.flush().await.unwrap();

        let mut chunks = Vec::new();
        while let Some(chunk) = audio.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].len(), 160);
    }
}
