//! Error types for the conversation engine.

/// Top-level error type for the voice conversation engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Speech capture (recognition stream or microphone) error.
    #[error("capture error: {0}")]
    Capture(String),

    /// The user or platform refused microphone / recognition access.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Text-to-speech synthesis or playback error.
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Chat completion service error.
    #[error("chat error: {0}")]
    Chat(String),

    /// Conversation analysis service error.
    #[error("analysis error: {0}")]
    Analysis(String),

    /// Speech correction service error.
    #[error("correction error: {0}")]
    Correction(String),

    /// Conversation session persistence error.
    #[error("session error: {0}")]
    Session(String),

    /// Knowledge article creation / lookup error.
    #[error("knowledge error: {0}")]
    Knowledge(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP transport error talking to a REST service.
    #[error("http error: {0}")]
    Http(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send/receive error (orchestrator gone).
    #[error("channel error: {0}")]
    Channel(String),
}

impl EngineError {
    /// Whether this error ends the conversation rather than being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::Config(_))
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EngineError>;
