//! Drift correction policy
//!
//! A viewer only force-seeks when its position has diverged from the
//! host's by more than a threshold, so sub-second network jitter does not
//! turn into constant seeking.

use crate::config::SyncTiming;

/// Whether `local` has drifted far enough from `remote` to force a seek.
/// No clamping to content duration happens here.
pub fn should_correct(remote_time: f64, local_time: f64, threshold: f64) -> bool {
    (remote_time - local_time).abs() > threshold
}

/// Drift policy bound to one threshold
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftCorrector {
    threshold: f64,
}

impl DriftCorrector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Position to seek to, or `None` if the drift is tolerable
    pub fn correction(&self, remote_time: f64, local_time: f64) -> Option<f64> {
        should_correct(remote_time, local_time, self.threshold).then_some(remote_time)
    }
}

impl Default for DriftCorrector {
    fn default() -> Self {
        Self::new(SyncTiming::default().drift_threshold_secs)
    }
}
