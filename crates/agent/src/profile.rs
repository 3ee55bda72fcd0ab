//! Caller speaking profile
//!
//! Tracks how many words the caller uses per utterance and nudges response
//! length to match.

use std::collections::VecDeque;
use unicode_segmentation::UnicodeSegmentation;

/// Utterances in the rolling window
const WINDOW: usize = 6;
/// Utterances needed before the profile leaves `Balanced`
const MIN_SAMPLES: usize = 2;
const TERSE_MAX_WORDS: f64 = 5.0;
const DETAILED_MIN_WORDS: f64 = 25.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakingStyle {
    Terse,
    Balanced,
    Detailed,
}

impl SpeakingStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakingStyle::Terse => "terse",
            SpeakingStyle::Balanced => "balanced",
            SpeakingStyle::Detailed => "detailed",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpeakingProfile {
    recent: VecDeque<usize>,
}

impl SpeakingProfile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one user utterance
    pub fn update(&mut self, text: &str) {
        let words = text.unicode_words().count();
        if words == 0 {
            return;
        }
        if self.recent.len() == WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(words);
    }

    pub fn samples(&self) -> usize {
        self.recent.len()
    }

    pub fn avg_words(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        self.recent.iter().sum::<usize>() as f64 / self.recent.len() as f64
    }

    pub fn style(&self) -> SpeakingStyle {
        if self.recent.len() < MIN_SAMPLES {
            return SpeakingStyle::Balanced;
        }
        let avg = self.avg_words();
        if avg <= TERSE_MAX_WORDS {
            SpeakingStyle::Terse
        } else if avg >= DETAILED_MIN_WORDS {
            SpeakingStyle::Detailed
        } else {
            SpeakingStyle::Balanced
        }
    }

    /// Prompt hint for the current style, if it calls for one
    pub fn style_hint(&self) -> Option<&'static str> {
        match self.style() {
            SpeakingStyle::Terse => Some(
                "The caller speaks in short bursts. Answer in one short sentence unless they ask for more.",
            ),
            SpeakingStyle::Detailed => Some(
                "The caller gives detailed context. You may use up to four sentences and cover specifics.",
            ),
            SpeakingStyle::Balanced => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_samples_before_adapting() {
        let mut profile = SpeakingProfile::new();
        profile.update("yes");
        assert_eq!(profile.style(), SpeakingStyle::Balanced);
        profile.update("no thanks");
        assert_eq!(profile.style(), SpeakingStyle::Terse);
        assert!(profile.style_hint().is_some());
    }

    #[test]
    fn test_detailed_and_window() {
        let mut profile = SpeakingProfile::new();
        let long = "I need you to look at the deployment we did yesterday afternoon because the \
                    edge nodes in the east region started reporting latency spikes right after it";
        profile.update(long);
        profile.update(long);
        assert_eq!(profile.style(), SpeakingStyle::Detailed);

        for _ in 0..WINDOW {
            profile.update("ok then");
        }
        assert_eq!(profile.samples(), WINDOW);
        assert_eq!(profile.avg_words(), 2.0);
        assert_eq!(profile.style(), SpeakingStyle::Terse);
    }

    #[test]
    fn test_empty_utterance_ignored() {
        let mut profile = SpeakingProfile::new();
        profile.update("  ... ");
        assert_eq!(profile.samples(), 0);
        assert_eq!(profile.style().as_str(), "balanced");
    }
}
