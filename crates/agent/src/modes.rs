//! Call mode overlays: meeting minutes and briefings
//!
//! Phrase matching is substring-based on the lowercased utterance.

use chrono::NaiveDateTime;
use std::time::{Duration, Instant};

const MINUTES_START: &[&str] = &[
    "take minutes",
    "start minutes",
    "start taking minutes",
    "take notes on this meeting",
    "meeting minutes",
    "record this meeting",
    "record the meeting",
];

const MINUTES_STOP: &[&str] = &[
    "stop minutes",
    "end minutes",
    "stop taking minutes",
    "wrap up the minutes",
    "wrap it up",
    "finish minutes",
    "done with minutes",
    "that's it for the meeting",
    "end the meeting",
    "stop recording",
];

const BRIEFING_START: &[&str] = &[
    "give me a briefing",
    "give me the briefing",
    "give me a rundown",
    "give me the rundown",
    "run me through",
    "brief me on",
    "brief me about",
    "brief me",
    "status report",
    "what's the latest",
];

const BRIEFING_STOP: &[&str] = &[
    "end briefing",
    "stop briefing",
    "back to normal",
    "that's all",
    "that is all",
    "exit briefing",
];

const BRIEFING_ACKS: &[&str] = &[
    "thanks",
    "thank you",
    "got it",
    "okay",
    "ok",
    "cool",
    "great",
    "perfect",
    "good",
    "alright",
    "all right",
    "yep",
    "yup",
    "sure",
];

const TOPIC_PREPOSITIONS: &[&str] = &["on ", "about ", "regarding ", "for "];

/// Briefing turns before short replies end the briefing
const AUTO_EXIT_MIN_TURNS: u32 = 2;
const AUTO_EXIT_MAX_WORDS: usize = 4;

pub const EMPTY_MINUTES_PROMPT: &str = "The meeting is over but nothing was discussed.";
pub const BRIEFING_CLOSE_PROMPT: &str =
    "The briefing is over. Give a brief, natural acknowledgment — one sentence max.";

fn contains_any(lower: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| lower.contains(p))
}

pub fn is_minutes_start(lower: &str) -> bool {
    contains_any(lower, MINUTES_START)
}

pub fn is_minutes_stop(lower: &str) -> bool {
    contains_any(lower, MINUTES_STOP)
}

pub fn is_briefing_start(lower: &str) -> bool {
    contains_any(lower, BRIEFING_START)
}

pub fn is_briefing_stop(lower: &str) -> bool {
    contains_any(lower, BRIEFING_STOP)
}

/// Text after the longest matching briefing trigger, minus one leading
/// preposition
pub fn briefing_topic(lower: &str) -> String {
    let mut triggers: Vec<&str> = BRIEFING_START.to_vec();
    triggers.sort_by_key(|t| std::cmp::Reverse(t.len()));

    for trigger in triggers {
        let Some(idx) = lower.find(trigger) else {
            continue;
        };
        let mut remainder = lower[idx + trigger.len()..].trim();
        if let Some(prep) = TOPIC_PREPOSITIONS.iter().find(|p| remainder.starts_with(*p)) {
            remainder = &remainder[prep.len()..];
        }
        return remainder.to_string();
    }
    String::new()
}

/// One line of meeting minutes
#[derive(Debug, Clone, PartialEq)]
pub struct MinutesEntry {
    pub text: String,
    /// Seconds since minutes started
    pub elapsed_secs: u64,
}

impl MinutesEntry {
    /// `[m:ss] text`
    pub fn line(&self) -> String {
        format!(
            "[{}:{:02}] {}",
            self.elapsed_secs / 60,
            self.elapsed_secs % 60,
            self.text
        )
    }
}

/// Minutes in progress
#[derive(Debug, Clone)]
pub struct MinutesState {
    started_at: Instant,
    pub entries: Vec<MinutesEntry>,
}

impl MinutesState {
    pub fn start() -> Self {
        Self {
            started_at: Instant::now(),
            entries: Vec::new(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Store an utterance; returns the entry
    pub fn record(&mut self, text: &str) -> &MinutesEntry {
        let entry = MinutesEntry {
            text: text.to_string(),
            elapsed_secs: self.elapsed().as_secs(),
        };
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(MinutesEntry::line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Prompt asking for a spoken summary of the transcript
    pub fn summary_request(&self, duration: Duration) -> String {
        format!(
            "I just finished taking minutes on a meeting. Duration: {} minutes, {} spoken entries.\n\n\
             Transcript:\n{}\n\n\
             Summarize this meeting. Cover the key points discussed, any decisions made, \
             and action items if any were mentioned. This will be spoken aloud so keep it \
             natural and conversational. No bullet points or formatting.",
            duration_minutes(duration),
            self.entries.len(),
            self.transcript()
        )
    }

    /// Title and body of the note saved after the summary
    pub fn note(&self, summary: &str, duration: Duration, at: NaiveDateTime) -> (String, String) {
        let title = format!("Meeting Minutes — {}", at.format("%Y-%m-%d %H:%M"));
        let body = format!(
            "Duration: {} minutes | {} entries\n\nSummary:\n{}\n\n--- Transcript ---\n{}",
            duration_minutes(duration),
            self.entries.len(),
            summary,
            self.transcript()
        );
        (title, body)
    }
}

fn duration_minutes(duration: Duration) -> u64 {
    (duration.as_secs_f64() / 60.0).round() as u64
}

/// Briefing in progress
#[derive(Debug, Clone)]
pub struct BriefingState {
    pub topic: String,
    pub turn_count: u32,
    started_at: Instant,
}

impl BriefingState {
    pub fn start(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            turn_count: 1,
            started_at: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Prompt sent in place of the trigger utterance
    pub fn opening_prompt(&self) -> String {
        if self.topic.is_empty() {
            "Give me a general status briefing.".to_string()
        } else {
            format!("Give me a briefing on {}.", self.topic)
        }
    }

    /// Short or acknowledgement-like replies end a briefing that has had
    /// at least two turns
    pub fn should_auto_exit(&self, lower: &str) -> bool {
        if self.turn_count < AUTO_EXIT_MIN_TURNS {
            return false;
        }
        lower.split_whitespace().count() <= AUTO_EXIT_MAX_WORDS
            || BRIEFING_ACKS.iter().any(|ack| lower.starts_with(ack))
    }
}
