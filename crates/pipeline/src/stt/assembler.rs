//! Turn assembly from upstream transcription messages
//!
//! Pure translation of upstream JSON into [`SttEvent`]s. Two message
//! families are understood:
//! - `Results` / `SpeechStarted` / `UtteranceEnd` from silence endpointing,
//!   where final fragments accumulate until `speech_final` commits them
//! - `TurnInfo` from model turn detection, which carries the whole turn
//!   transcript on every event

use serde::Deserialize;

use super::SttEvent;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum UpstreamMessage {
    Results {
        channel: ResultChannel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
    },
    SpeechStarted,
    UtteranceEnd,
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },
    TurnInfo {
        event: TurnEvent,
        #[serde(default)]
        transcript: String,
    },
    Error {
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResultChannel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

#[derive(Debug, Deserialize)]
enum TurnEvent {
    StartOfTurn,
    Update,
    EagerEndOfTurn,
    TurnResumed,
    EndOfTurn,
    #[serde(other)]
    Unknown,
}

/// Accumulates final fragments into the turn buffer and decides commits
#[derive(Debug, Default)]
pub struct TurnAssembler {
    buffer: Vec<String>,
    messages: u64,
}

impl TurnAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current turn buffer, single-space joined
    pub fn buffer(&self) -> String {
        self.buffer.join(" ")
    }

    /// Upstream messages seen so far
    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Translate one upstream text frame into zero or more events
    pub fn handle(&mut self, raw: &str) -> Vec<SttEvent> {
        self.messages += 1;

        let message: UpstreamMessage = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unparseable transcription message");
                return Vec::new();
            }
        };

        match message {
            UpstreamMessage::Results {
                channel,
                is_final,
                speech_final,
            } => self.on_results(channel, is_final, speech_final),
            UpstreamMessage::SpeechStarted => vec![SttEvent::SpeechStarted],
            UpstreamMessage::UtteranceEnd => self.commit().into_iter().collect(),
            UpstreamMessage::Metadata { request_id } => {
                tracing::debug!(request_id = ?request_id, "Transcription stream metadata");
                Vec::new()
            }
            UpstreamMessage::TurnInfo { event, transcript } => self.on_turn_info(event, transcript),
            UpstreamMessage::Error {
                description,
                message,
            } => {
                tracing::warn!(
                    description = ?description,
                    message = ?message,
                    "Transcription upstream reported an error"
                );
                Vec::new()
            }
            UpstreamMessage::Other => Vec::new(),
        }
    }

    fn on_results(
        &mut self,
        channel: ResultChannel,
        is_final: bool,
        speech_final: bool,
    ) -> Vec<SttEvent> {
        let text = channel
            .alternatives
            .into_iter()
            .next()
            .map(|alt| alt.transcript.trim().to_string())
            .unwrap_or_default();

        let mut events = Vec::new();
        if !text.is_empty() {
            events.push(SttEvent::Transcript {
                text: text.clone(),
                is_final: is_final || speech_final,
            });
            if is_final || speech_final {
                self.buffer.push(text);
            }
        }

        if speech_final {
            events.extend(self.commit());
        }
        events
    }

    fn on_turn_info(&mut self, event: TurnEvent, transcript: String) -> Vec<SttEvent> {
        let transcript = transcript.trim().to_string();
        match event {
            TurnEvent::StartOfTurn => {
                self.buffer.clear();
                vec![SttEvent::SpeechStarted]
            }
            TurnEvent::Update => {
                if transcript.is_empty() {
                    return Vec::new();
                }
                self.buffer = vec![transcript.clone()];
                vec![SttEvent::Transcript {
                    text: transcript,
                    is_final: false,
                }]
            }
            TurnEvent::EagerEndOfTurn => {
                self.buffer.clear();
                if transcript.is_empty() {
                    return Vec::new();
                }
                vec![SttEvent::EagerUtterance(transcript)]
            }
            TurnEvent::TurnResumed => vec![SttEvent::UtteranceCancelled],
            TurnEvent::EndOfTurn => {
                self.buffer.clear();
                if transcript.is_empty() {
                    return Vec::new();
                }
                vec![
                    SttEvent::Transcript {
                        text: transcript.clone(),
                        is_final: true,
                    },
                    SttEvent::Utterance(transcript),
                ]
            }
            TurnEvent::Unknown => Vec::new(),
        }
    }

    fn commit(&mut self) -> Option<SttEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let text = self.buffer();
        self.buffer.clear();
        Some(SttEvent::Utterance(text))
    }
}
