//! Sentence splitter for streaming reasoning-engine output
//!
//! Buffers text deltas and yields complete sentences so synthesis can start
//! before the full reply is known. The first sentence may be cut early at a
//! clause break to shave latency off the first audio.

/// Splitter configuration
#[derive(Debug, Clone)]
pub struct SentenceSplitterConfig {
    /// Minimum characters before the first sentence may be cut at a clause break
    pub min_chars_first_sentence: usize,
    /// Buffer length that forces emission at the last word boundary
    pub max_buffer_chars: usize,
}

impl Default for SentenceSplitterConfig {
    fn default() -> Self {
        Self {
            min_chars_first_sentence: 15,
            max_buffer_chars: 400,
        }
    }
}

const TERMINATORS: [char; 3] = ['.', '!', '?'];
const CLAUSE_BREAKS: [char; 4] = [',', ';', ':', '\u{2014}'];
const CLOSERS: [char; 6] = ['"', '\'', ')', ']', '\u{201D}', '\u{2019}'];

/// Incremental sentence splitter
#[derive(Debug, Default)]
pub struct SentenceSplitter {
    config: SentenceSplitterConfig,
    buffer: String,
    emitted: usize,
}

impl SentenceSplitter {
    pub fn new(config: SentenceSplitterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            emitted: 0,
        }
    }

    /// Number of sentences yielded so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Feed a text delta, returning any sentences it completed
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = self.extract_sentences();

        if sentences.is_empty() {
            if let Some(early) = self.early_cut() {
                sentences.push(early);
            }
        }

        self.emitted += sentences.len();
        sentences
    }

    /// Drain whatever is left at the end of the stream
    pub fn finish(&mut self) -> Option<String> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            None
        } else {
            self.emitted += 1;
            Some(text)
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.emitted = 0;
    }

    fn extract_sentences(&mut self) -> Vec<String> {
        let mut sentences = Vec::new();
        let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
        let mut start = 0;
        let mut i = 0;

        while i < chars.len() {
            let (_, c) = chars[i];
            if !TERMINATORS.contains(&c) {
                i += 1;
                continue;
            }

            let mut end = i + 1;
            while end < chars.len() && CLOSERS.contains(&chars[end].1) {
                end += 1;
            }

            // A terminator only ends a sentence once whitespace follows it;
            // otherwise "3.5" or a trailing "." awaiting more text would split.
            if end >= chars.len() || !chars[end].1.is_whitespace() {
                i = end;
                continue;
            }

            let byte_end = chars[end].0;
            let sentence = self.buffer[start..byte_end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            start = byte_end;
            i = end + 1;
        }

        if start > 0 {
            self.buffer = self.buffer[start..].trim_start().to_string();
        }
        sentences
    }

    fn early_cut(&mut self) -> Option<String> {
        let len = self.buffer.chars().count();

        let cut = if self.emitted == 0 && len >= self.config.min_chars_first_sentence {
            self.buffer
                .char_indices()
                .filter(|(_, c)| CLAUSE_BREAKS.contains(c))
                .map(|(idx, c)| idx + c.len_utf8())
                .filter(|&idx| {
                    self.buffer[idx..]
                        .chars()
                        .next()
                        .map_or(false, char::is_whitespace)
                })
                .last()
        } else if len >= self.config.max_buffer_chars {
            self.buffer.rfind(char::is_whitespace)
        } else {
            None
        };

        let cut = cut?;
        let head = self.buffer[..cut].trim().to_string();
        if head.is_empty() {
            return None;
        }
        self.buffer = self.buffer[cut..].trim_start().to_string();
        Some(head)
    }
}
