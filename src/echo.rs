//! Self-echo rejection.
//!
//! Speech recognition keeps running while the assistant talks so the user
//! can interrupt, which means the recognizer also hears the assistant's own
//! synthesized voice. Its transcript of that voice is rarely exact, so the
//! classifier accepts fuzzy matches: a substring hit, or enough shared
//! character n-grams with the text currently being spoken.

use crate::config::EchoConfig;
use std::collections::HashSet;
use tokio::time::Instant;

/// Lowercase and drop whitespace and punctuation.
///
/// Used for both echo comparison and intent matching so that recognizer
/// formatting ("大丈夫です。" vs "大丈夫です") never changes a decision.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !is_punctuation(*c))
        .flat_map(char::to_lowercase)
        .collect()
}

fn is_punctuation(c: char) -> bool {
    if c.is_ascii_punctuation() {
        return true;
    }
    matches!(
        c,
        '、' | '。'
            | '，'
            | '．'
            | '・'
            | '！'
            | '？'
            | '「'
            | '」'
            | '『'
            | '』'
            | '（'
            | '）'
            | '【'
            | '】'
            | '〜'
            | '…'
            | '‐'
            | '—'
            | '–'
            | '\u{2018}'
            | '\u{2019}'
            | '\u{201C}'
            | '\u{201D}'
    )
}

/// Character n-gram set of an already normalized string.
fn ngrams(chars: &[char], n: usize) -> HashSet<&[char]> {
    if n == 0 || chars.len() < n {
        return HashSet::new();
    }
    chars.windows(n).collect()
}

/// Decides whether recognized text is the assistant's own voice.
#[derive(Debug, Clone)]
pub struct EchoClassifier {
    min_chars: usize,
    ngram: usize,
    overlap_threshold: f32,
}

impl EchoClassifier {
    /// Create a classifier from configuration.
    pub fn new(config: &EchoConfig) -> Self {
        Self {
            min_chars: config.min_chars,
            ngram: config.ngram,
            overlap_threshold: config.overlap_threshold,
        }
    }

    /// Classify `candidate` against the text the assistant is speaking.
    pub fn is_echo(&self, spoken_text: &str, candidate: &str) -> bool {
        let candidate = normalize(candidate);
        let candidate_chars: Vec<char> = candidate.chars().collect();
        if candidate_chars.len() < self.min_chars {
            return false;
        }
        let spoken = normalize(spoken_text);
        if spoken.is_empty() {
            return false;
        }
        if spoken.contains(&candidate) {
            return true;
        }

        let candidate_grams = ngrams(&candidate_chars, self.ngram);
        if candidate_grams.is_empty() {
            return false;
        }
        let spoken_chars: Vec<char> = spoken.chars().collect();
        let spoken_grams = ngrams(&spoken_chars, self.ngram);
        let shared = candidate_grams
            .iter()
            .filter(|g| spoken_grams.contains(*g))
            .count();
        let ratio = shared as f32 / candidate_grams.len() as f32;
        ratio >= self.overlap_threshold
    }
}

impl Default for EchoClassifier {
    fn default() -> Self {
        Self::new(&EchoConfig::default())
    }
}

/// The text the assistant is (or was just) speaking.
///
/// Set when synthesis starts; after playback ends or is interrupted it is
/// kept until a deadline so the acoustic tail is still rejected, then
/// cleared.
#[derive(Debug, Default)]
pub struct SpokenText {
    text: String,
    clear_at: Option<Instant>,
}

impl SpokenText {
    /// Replace the buffer with the text about to be synthesized.
    pub fn set(&mut self, text: &str) {
        self.text = text.to_owned();
        self.clear_at = None;
    }

    /// Keep the current text until `deadline`, then drop it.
    pub fn clear_after(&mut self, deadline: Instant) {
        if !self.text.is_empty() {
            self.clear_at = Some(deadline);
        }
    }

    /// Drop the buffer immediately.
    pub fn clear(&mut self) {
        self.text.clear();
        self.clear_at = None;
    }

    /// Pending clear deadline, if any.
    pub fn clear_deadline(&self) -> Option<Instant> {
        self.clear_at
    }

    /// Clear the buffer if its deadline has passed. Returns whether it did.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.clear_at {
            Some(deadline) if now >= deadline => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    /// Current text (empty when nothing is being spoken).
    pub fn as_str(&self) -> &str {
        &self.text
    }
}
