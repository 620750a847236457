//! Conversation session and turn types.
//!
//! A [`ConversationSession`] is created lazily when the first user
//! utterance is committed, accumulates [`Turn`]s for its whole life, and is
//! completed explicitly when the conversation ends. Turns are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique session identifier assigned by the persistence collaborator.
pub type SessionId = String;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The field worker.
    User,
    /// The AI assistant.
    Assistant,
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Conversation in progress.
    #[default]
    Active,
    /// Conversation ended; no further turns.
    Completed,
}

/// A knowledge article the chat service cited in a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeRef {
    /// Article id.
    pub id: String,
    /// Article title.
    pub title: String,
}

/// Structured data attached to a turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnMetadata {
    /// Articles referenced by an assistant reply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub knowledge_refs: Vec<KnowledgeRef>,
    /// Article created from this conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_article_id: Option<String>,
}

impl TurnMetadata {
    fn is_empty(&self) -> bool {
        self.knowledge_refs.is_empty() && self.created_article_id.is_none()
    }
}

/// One role-tagged message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    /// Speaker.
    pub role: Role,
    /// Message text (after speech correction for user turns).
    pub content: String,
    /// Recognizer output before correction, when correction changed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
    /// Optional structured metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TurnMetadata>,
    /// When the turn was appended.
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// A user turn. `raw` is kept only if it differs from `content`.
    pub fn user(content: impl Into<String>, raw: Option<String>) -> Self {
        let content = content.into();
        let raw_content = raw.filter(|r| r.trim() != content.trim());
        Self {
            role: Role::User,
            content,
            raw_content,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            raw_content: None,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Attach metadata, dropping it if empty.
    pub fn with_metadata(mut self, metadata: TurnMetadata) -> Self {
        self.metadata = if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        };
        self
    }
}

/// A conversation owned by the orchestrator for its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    /// Persistence id; `None` until the store has created the session.
    pub id: Option<SessionId>,
    /// Mode tag (e.g. `voice`).
    pub mode: String,
    /// Ordered, append-only turns.
    turns: Vec<Turn>,
    /// Lifecycle status.
    pub status: SessionStatus,
}

impl ConversationSession {
    /// Create an empty active session.
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            id: None,
            mode: mode.into(),
            turns: Vec::new(),
            status: SessionStatus::Active,
        }
    }

    /// Append a turn. Completed sessions reject new turns.
    ///
    /// Returns whether the turn was appended.
    pub fn push(&mut self, turn: Turn) -> bool {
        if self.status == SessionStatus::Completed {
            return false;
        }
        self.turns.push(turn);
        true
    }

    /// All turns in order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turn has been appended.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of user turns.
    pub fn user_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::User).count()
    }

    /// Mark the session completed.
    pub fn complete(&mut self) {
        self.status = SessionStatus::Completed;
    }

    /// Whether the session has been completed.
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}
