//! fieldvoice: hands-free voice conversation engine for field workers.
//!
//! A worker talks, the assistant answers out loud, and useful know-how from
//! the conversation can be saved as a knowledge article without touching
//! the screen.
//!
//! # Architecture
//!
//! One orchestrator task owns the conversation and reacts to:
//! - **Recognition**: partial/final transcripts from the speech capture service
//! - **Silence debounce**: commits an utterance once the user stops talking
//! - **Echo rejection**: drops transcripts of the assistant's own voice
//! - **Barge-in**: microphone energy over a calibrated threshold stops playback
//! - **Intents**: closing phrases, registration requests and confirmations
//! - **Services**: chat, analysis, correction, sessions and knowledge storage
//!
//! Every external system sits behind a trait in [`services`], so the engine
//! runs the same against the REST backend, in-memory stores or test fakes.

pub mod audio;
pub mod config;
pub mod echo;
pub mod error;
pub mod intent;
pub mod logging;
pub mod pipeline;
pub mod registration;
pub mod runtime;
pub mod services;
pub mod session;
pub mod speech;
pub mod vad;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use pipeline::{DialogueOrchestrator, EngineSnapshot, OrchestratorHandle};
pub use runtime::{DialogueState, RuntimeEvent};
pub use services::Services;
