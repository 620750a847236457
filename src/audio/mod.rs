//! Microphone level metering.
//!
//! The orchestrator never touches raw audio: it only needs the short-time
//! energy of the microphone signal to tell genuine user speech apart from
//! the assistant's own voice leaking back in while it talks.

#[cfg(feature = "cpal")]
pub mod capture;
pub mod meter;

use crate::error::Result;

/// A source of the current microphone activity level (0–255 scale).
///
/// The orchestrator opens the source when a conversation starts and closes
/// it on every exit path; nothing else may open or close it.
pub trait AudioLevelSource: Send + Sync {
    /// Acquire the underlying device. Calling it while open is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::EngineError::PermissionDenied`] when the
    /// platform refuses microphone access, or a capture error otherwise.
    fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying device. Calling it while closed is a no-op.
    fn close(&self) {}

    /// Current short-time energy.
    fn level(&self) -> f32;
}
