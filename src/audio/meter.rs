//! Short-time energy metering of the live microphone signal.
//!
//! The meter keeps a small rolling window of per-chunk energies and reports
//! their mean on a 0–255 scale, the same scale the barge-in detector's
//! thresholds are expressed in.

use super::AudioLevelSource;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Full-scale RMS (1.0) maps to this level.
const LEVEL_SCALE: f32 = 255.0;

/// Rolling short-time energy meter.
///
/// Audio producers call [`ActivityMeter::push_samples`] (or
/// [`ActivityMeter::push_level`] when they already measure energy); the
/// orchestrator reads [`AudioLevelSource::level`].
pub struct ActivityMeter {
    window: Mutex<VecDeque<f32>>,
    capacity: usize,
}

impl ActivityMeter {
    /// Create a meter averaging the last `window` chunks (minimum 1).
    pub fn new(window: usize) -> Self {
        let capacity = window.max(1);
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Record one chunk of mono f32 samples.
    pub fn push_samples(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        self.push_level(rms_to_level(compute_rms_energy(samples)));
    }

    /// Record an already computed level (0–255).
    pub fn push_level(&self, level: f32) {
        let Ok(mut window) = self.window.lock() else {
            return;
        };
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(level.clamp(0.0, LEVEL_SCALE));
    }

    /// Forget all recorded energy.
    pub fn reset(&self) {
        if let Ok(mut window) = self.window.lock() {
            window.clear();
        }
    }
}

impl AudioLevelSource for ActivityMeter {
    fn level(&self) -> f32 {
        let Ok(window) = self.window.lock() else {
            return 0.0;
        };
        if window.is_empty() {
            return 0.0;
        }
        window.iter().sum::<f32>() / window.len() as f32
    }
}

/// Compute RMS energy of audio samples.
pub fn compute_rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Map an RMS value in \[0, 1\] onto the 0–255 level scale.
pub fn rms_to_level(rms: f32) -> f32 {
    (rms * LEVEL_SCALE).clamp(0.0, LEVEL_SCALE)
}
