//! Utterance assembly and silence debounce.
//!
//! Recognition results arrive continuously. Every genuine (non-echo) event
//! pushes the commit deadline out by the silence window; when the deadline
//! passes with nothing new, the accumulated text becomes one committed
//! utterance. Echo events never touch the deadline.

use super::messages::{CommittedUtterance, RecognitionEvent};
use crate::echo::EchoClassifier;
use std::time::Duration;
use tokio::time::Instant;

/// Result of offering one recognition event to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerOutcome {
    /// Blank text; nothing changed.
    Ignored,
    /// The assistant's own voice; discarded without resetting the timer.
    Echo,
    /// Genuine user speech; the deadline was reset.
    Speech {
        /// Full transcript of the pending utterance so far.
        transcript: String,
    },
}

/// Accumulates recognition results into committed utterances.
#[derive(Debug)]
pub struct UtteranceAssembler {
    classifier: EchoClassifier,
    silence: Duration,
    finalized: String,
    interim: String,
    deadline: Option<Instant>,
}

impl UtteranceAssembler {
    /// Create an assembler committing after `silence` without new speech.
    pub fn new(classifier: EchoClassifier, silence: Duration) -> Self {
        Self {
            classifier,
            silence,
            finalized: String::new(),
            interim: String::new(),
            deadline: None,
        }
    }

    /// Offer a recognition event.
    ///
    /// `spoken_text` is what the assistant is currently saying (empty when
    /// silent).
    pub fn offer(
        &mut self,
        event: &RecognitionEvent,
        spoken_text: &str,
        now: Instant,
    ) -> AssemblerOutcome {
        let text = event.text.trim();
        if text.is_empty() {
            return AssemblerOutcome::Ignored;
        }
        if self.classifier.is_echo(spoken_text, text) {
            return AssemblerOutcome::Echo;
        }

        if event.is_final {
            append_segment(&mut self.finalized, text);
            self.interim.clear();
        } else {
            self.interim = text.to_owned();
        }
        self.deadline = Some(now + self.silence);
        AssemblerOutcome::Speech {
            transcript: self.transcript(),
        }
    }

    /// When the pending utterance will be committed, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Commit the pending utterance if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<CommittedUtterance> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.commit(now, false),
            _ => None,
        }
    }

    /// Commit the pending utterance immediately, regardless of the timer.
    pub fn finalize_now(&mut self, now: Instant) -> Option<CommittedUtterance> {
        self.commit(now, true)
    }

    /// Drop any pending text and cancel the timer.
    pub fn clear(&mut self) {
        self.finalized.clear();
        self.interim.clear();
        self.deadline = None;
    }

    /// Whether text is waiting to be committed.
    pub fn has_pending(&self) -> bool {
        !self.finalized.is_empty() || !self.interim.is_empty()
    }

    /// Current transcript: finalized segments plus the live interim text.
    pub fn transcript(&self) -> String {
        let mut text = self.finalized.clone();
        append_segment(&mut text, &self.interim);
        text
    }

    fn commit(&mut self, now: Instant, forced: bool) -> Option<CommittedUtterance> {
        let text = self.transcript().trim().to_owned();
        self.clear();
        if text.is_empty() {
            return None;
        }
        Some(CommittedUtterance {
            text,
            committed_at: now,
            forced,
        })
    }
}

/// Join recognizer segments; only Latin-script boundaries get a space.
fn append_segment(buf: &mut String, segment: &str) {
    if segment.is_empty() {
        return;
    }
    let needs_space = matches!(
        (buf.chars().last(), segment.chars().next()),
        (Some(a), Some(b)) if a.is_ascii_alphanumeric() && b.is_ascii_alphanumeric()
    );
    if needs_space {
        buf.push(' ');
    }
    buf.push_str(segment);
}
