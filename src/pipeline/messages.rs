//! Message types passed between the capture service, the orchestrator and
//! its front end.

use tokio::time::Instant;

/// A recognition result from the speech capture service.
///
/// Interim results are revised on every event; a final result closes one
/// recognizer segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionEvent {
    /// Recognized text of the current segment.
    pub text: String,
    /// Whether the recognizer will not revise this segment again.
    pub is_final: bool,
}

impl RecognitionEvent {
    /// An interim (revisable) result.
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    /// A final result.
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Errors surfaced by the speech capture service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Nothing was heard for a while; the recognizer gave up.
    NoSpeech,
    /// Network hiccup, audio glitch or similar; safe to restart.
    Transient(String),
    /// The user or platform refused microphone access.
    PermissionDenied(String),
}

impl CaptureError {
    /// Whether the conversation must end.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Everything the capture service reports to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A partial or final recognition result.
    Recognition(RecognitionEvent),
    /// A capture error.
    Error(CaptureError),
    /// The recognition stream ended on its own.
    Ended,
}

/// The finalized text of one user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedUtterance {
    /// Utterance text.
    pub text: String,
    /// When the utterance was committed.
    pub committed_at: Instant,
    /// Whether a forced finalize (not the silence timer) produced it.
    pub forced: bool,
}

/// Requests from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationCommand {
    /// Start a hands-free conversation.
    Start,
    /// Stop the conversation, keeping what was said.
    Stop,
    /// Stop the conversation and delete its persisted session.
    Discard,
    /// Commit the pending transcript now instead of waiting for silence.
    FinalizeNow,
}
