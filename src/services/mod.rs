//! Contracts for the external services the engine drives.
//!
//! The engine owns none of these: speech recognition, synthesis, the
//! language-model chat and analysis endpoints, speech correction, session
//! history and knowledge storage are all black boxes behind the traits
//! below. [`memory`] holds in-process implementations, [`http`] talks to
//! the application's REST API.

pub mod http;
pub mod memory;

use crate::audio::AudioLevelSource;
use crate::error::Result;
use crate::pipeline::messages::CaptureEvent;
use crate::registration::{Article, NewArticle, RegistrationProposal};
use crate::session::{KnowledgeRef, SessionId, Turn};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Continuous speech recognition.
///
/// `start` and `stop` only flip the recognizer on and off; results, errors
/// and end-of-stream notices arrive on the channel passed to `start`. After
/// reporting an error or [`CaptureEvent::Ended`] the stream is inactive
/// until started again.
pub trait SpeechCapture: Send + Sync {
    /// Start a recognition stream. Implementations must treat a start while
    /// active as a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::PermissionDenied`] when access
    /// is refused, or a capture error for anything recoverable.
    fn start(&self, events: mpsc::UnboundedSender<CaptureEvent>) -> Result<()>;

    /// Stop the recognition stream. A stop while inactive is a no-op.
    fn stop(&self);

    /// Whether a recognition stream is running.
    fn is_active(&self) -> bool;
}

/// Text-to-speech with playback.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize and play `text`, resolving when playback completes.
    ///
    /// # Errors
    ///
    /// Returns a synthesis error if audio could not be produced or played.
    async fn speak(&self, text: &str) -> Result<()>;

    /// Stop playback immediately.
    fn stop(&self);
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// The user's message.
    pub message: String,
    /// All earlier turns of the conversation.
    pub history: Vec<Turn>,
    /// Persisted session id, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Steering hint (e.g. wrap the conversation up).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// A chat completion reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    /// Assistant reply (may contain markdown and knowledge links).
    #[serde(alias = "reply")]
    pub reply_text: String,
    /// Knowledge articles the reply drew on.
    #[serde(default, alias = "relatedKnowledge")]
    pub related_references: Vec<KnowledgeRef>,
}

/// Language-model chat.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Produce the assistant's next reply.
    ///
    /// # Errors
    ///
    /// Returns a chat error if no reply could be produced.
    async fn chat(&self, request: ChatRequest) -> Result<ChatReply>;
}

/// Outcome of conversation analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Whether the conversation holds knowledge worth saving.
    pub should_register: bool,
    /// The extracted article candidate.
    #[serde(default)]
    pub extracted: Option<RegistrationProposal>,
}

/// Language-model conversation analysis.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Decide whether `turns` should become a knowledge article.
    ///
    /// # Errors
    ///
    /// Returns an analysis error if the service fails.
    async fn analyze(&self, turns: &[Turn]) -> Result<AnalysisResult>;
}

/// Best-effort speech-recognition correction (domain terms, homophones).
#[async_trait]
pub trait CorrectionService: Send + Sync {
    /// Return corrected text.
    ///
    /// # Errors
    ///
    /// Returns a correction error; callers fall back to the input text.
    async fn correct(&self, text: &str) -> Result<String>;
}

/// Conversation history persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a session and return its id.
    async fn create_session(&self, mode: &str) -> Result<SessionId>;

    /// Append turns to a session.
    async fn append_messages(&self, id: &str, turns: &[Turn]) -> Result<()>;

    /// Mark a session completed.
    async fn complete_session(&self, id: &str) -> Result<()>;

    /// Delete a session.
    async fn delete_session(&self, id: &str) -> Result<()>;
}

/// Knowledge article storage.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Create an article and return its id.
    async fn create(&self, article: &NewArticle) -> Result<String>;

    /// Read an article back.
    async fn get(&self, id: &str) -> Result<Article>;

    /// Drop any cached article list so the next listing is fresh.
    fn invalidate_cache(&self);
}

/// Every collaborator the orchestrator needs.
#[derive(Clone)]
pub struct Services {
    /// Continuous speech recognition.
    pub capture: Arc<dyn SpeechCapture>,
    /// Primary speech synthesis.
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Used when the primary synthesizer fails.
    pub fallback_synthesizer: Arc<dyn SpeechSynthesizer>,
    /// Chat completion.
    pub chat: Arc<dyn ChatService>,
    /// Conversation analysis.
    pub analysis: Arc<dyn AnalysisService>,
    /// Speech correction.
    pub correction: Arc<dyn CorrectionService>,
    /// Session persistence.
    pub sessions: Arc<dyn SessionStore>,
    /// Knowledge storage.
    pub knowledge: Arc<dyn KnowledgeStore>,
    /// Microphone level for barge-in.
    pub microphone: Arc<dyn AudioLevelSource>,
}
