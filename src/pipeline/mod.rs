//! Conversation pipeline: utterance assembly, session persistence and the
//! orchestrator that ties recognition, chat and synthesis together.

pub mod assembler;
pub mod coordinator;
pub mod messages;
pub mod recorder;

pub use coordinator::{DialogueOrchestrator, EngineSnapshot, OrchestratorHandle};
