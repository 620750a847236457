//! Barge-in detection using calibrated energy thresholding.
//!
//! While the assistant speaks, the microphone hears its voice too. The
//! detector spends the first samples of every speaking interval learning
//! how loud that echo is (the baseline), then flags any sample clearly
//! above it as the user talking over the assistant.

use crate::config::BargeInConfig;
use tracing::{debug, info};

/// Echo baseline learned at the start of one speaking interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadCalibration {
    /// Mean energy of the warm-up samples.
    pub baseline: f32,
    /// Energy a sample must exceed to count as user speech.
    pub threshold: f32,
}

/// Outcome of feeding one energy sample to the detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VadDecision {
    /// Still collecting warm-up samples.
    Calibrating,
    /// Calibration just finished with this sample.
    Calibrated(VadCalibration),
    /// Sample is within the echo envelope.
    Quiet,
    /// Genuine user speech; the detector has stopped itself.
    BargeIn {
        /// The sample that crossed the threshold.
        level: f32,
        /// The threshold it crossed.
        threshold: f32,
    },
    /// The detector already fired; further samples are ignored.
    Stopped,
}

/// Threshold derived from an echo baseline:
/// `max(baseline × multiplier, baseline + offset, floor)`.
pub fn barge_in_threshold(baseline: f32, config: &BargeInConfig) -> f32 {
    (baseline * config.multiplier)
        .max(baseline + config.offset)
        .max(config.floor)
}

/// Energy-based barge-in detector for a single speaking interval.
///
/// Build a fresh detector every time synthesis starts; the calibration is
/// meaningless for any other interval.
#[derive(Debug)]
pub struct BargeInDetector {
    config: BargeInConfig,
    warmup: Vec<f32>,
    calibration: Option<VadCalibration>,
    stopped: bool,
}

impl BargeInDetector {
    /// Create a detector that calibrates on its first samples.
    pub fn new(config: &BargeInConfig) -> Self {
        Self {
            config: config.clone(),
            warmup: Vec::with_capacity(config.calibration_samples),
            calibration: None,
            stopped: false,
        }
    }

    /// Feed one energy sample (0–255 scale).
    pub fn observe(&mut self, level: f32) -> VadDecision {
        if self.stopped {
            return VadDecision::Stopped;
        }

        let Some(calibration) = self.calibration else {
            self.warmup.push(level);
            if self.warmup.len() < self.config.calibration_samples.max(1) {
                return VadDecision::Calibrating;
            }
            let baseline = self.warmup.iter().sum::<f32>() / self.warmup.len() as f32;
            let calibration = VadCalibration {
                baseline,
                threshold: barge_in_threshold(baseline, &self.config),
            };
            info!(
                "VAD calibrated: baseline={:.1}, threshold={:.1}",
                calibration.baseline, calibration.threshold
            );
            self.calibration = Some(calibration);
            return VadDecision::Calibrated(calibration);
        };

        if level > calibration.threshold {
            self.stopped = true;
            info!(
                "barge-in: level {level:.1} exceeded threshold {:.1}",
                calibration.threshold
            );
            return VadDecision::BargeIn {
                level,
                threshold: calibration.threshold,
            };
        }
        debug!("VAD sample {level:.1} below threshold");
        VadDecision::Quiet
    }

    /// Calibration for this interval, once warm-up has finished.
    pub fn calibration(&self) -> Option<VadCalibration> {
        self.calibration
    }

    /// Whether the detector has fired.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
