//! Runtime events emitted by the orchestrator for the presentation layer.
//!
//! Events are broadcast; a slow or absent subscriber never blocks the
//! conversation.

use crate::registration::{ArticleStatus, RegistrationProposal};
use crate::session::{SessionId, Turn};

/// Observable conversation state.
///
/// `ConfirmingRegistration` is reported while listening with a proposal
/// awaiting an answer; `Ending` while the closing remark plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogueState {
    /// No conversation.
    #[default]
    Idle,
    /// Recognition running, waiting for the user.
    Listening,
    /// An utterance was committed and is being corrected and routed.
    Committing,
    /// Waiting on chat, analysis or knowledge creation.
    Processing,
    /// The assistant is talking.
    Speaking,
    /// Listening for the answer to a registration proposal.
    ConfirmingRegistration,
    /// Playing the closing remark before the conversation ends.
    Ending,
}

/// What stopped the assistant mid-sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInSource {
    /// Microphone energy crossed the calibrated threshold.
    Energy,
    /// The recognizer produced genuine (non-echo) text.
    Speech,
    /// The presentation layer forced a commit.
    Manual,
}

/// Events describing what the conversation is doing right now.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// The observable state changed.
    StateChanged(DialogueState),
    /// Live transcript of the pending utterance.
    Transcript {
        /// Transcript so far.
        text: String,
    },
    /// A user turn was recorded.
    UserTurn(Turn),
    /// An assistant turn was recorded.
    AssistantTurn(Turn),
    /// Synthesis of this (plain) text started.
    Speaking {
        /// Text being spoken.
        text: String,
    },
    /// The user interrupted the assistant.
    BargeIn {
        /// Trigger.
        source: BargeInSource,
    },
    /// Analysis proposed saving the conversation as an article.
    ProposalReady(RegistrationProposal),
    /// An article was created from the conversation.
    ArticleCreated {
        /// Article id.
        id: String,
        /// Saved status.
        status: ArticleStatus,
    },
    /// Something went wrong. Fatal errors end the conversation.
    Error {
        /// Human-readable description.
        message: String,
        /// Whether the conversation was torn down.
        fatal: bool,
    },
    /// The conversation finished.
    ConversationEnded {
        /// Persisted session id, if one was created.
        session_id: Option<SessionId>,
        /// `true` if completed, `false` if discarded.
        completed: bool,
    },
}
