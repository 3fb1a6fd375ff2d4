//! Buffering and cadence constants.
//!
//! The ratios between these numbers determine calibration-to-measurement
//! latency, so they are kept in one struct:
//!
//! | field | default | meaning |
//! |---|---|---|
//! | `frame_rate` | 30.0 | nominal input cadence, passed to the estimator |
//! | `min_window` | 150 | buffered frames required before any estimate (5 s) |
//! | `max_window` | 450 | retention cap; oldest frames are evicted first (15 s) |
//! | `estimate_window` | 300 | most recent frames handed to the estimator (10 s) |
//! | `report_interval` | 30 | estimate only when the frame count is a multiple of this |
//! | `full_window` | 450 | buffered frames that count as 100 % progress |
//! | `measuring_threshold_pct` | 33.0 | progress at which the label flips to `measuring` |

use serde::{Deserialize, Serialize};

use crate::messages::Phase;

/// A policy value that cannot work.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid window policy: {0}")]
pub struct InvalidPolicy(pub String);

/// Windowing and cadence configuration shared by every session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowPolicy {
    /// Nominal frames per second of the incoming stream.
    pub frame_rate: f64,
    /// Minimum buffered frames before the estimator may run.
    pub min_window: usize,
    /// Retention cap of the rolling buffer.
    pub max_window: usize,
    /// Size of the most-recent slice handed to the estimator.
    pub estimate_window: usize,
    /// Estimator cadence, in received frames.
    pub report_interval: u64,
    /// Progress denominator, in buffered frames.
    pub full_window: usize,
    /// Progress percentage at which a session is labelled `measuring`.
    pub measuring_threshold_pct: f64,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            frame_rate: 30.0,
            min_window: 150,
            max_window: 450,
            estimate_window: 300,
            report_interval: 30,
            full_window: 450,
            measuring_threshold_pct: 33.0,
        }
    }
}

impl WindowPolicy {
    /// Reject configurations that would stall or panic a session.
    ///
    /// A `full_window` larger than `max_window` is accepted with a warning:
    /// progress then plateaus below 100 %.
    pub fn validate(&self) -> Result<(), InvalidPolicy> {
        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(InvalidPolicy(format!(
                "frame_rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.min_window == 0 || self.max_window == 0 || self.estimate_window == 0 {
            return Err(InvalidPolicy("window sizes must be non-zero".into()));
        }
        if self.report_interval == 0 {
            return Err(InvalidPolicy("report_interval must be non-zero".into()));
        }
        if self.full_window == 0 {
            return Err(InvalidPolicy("full_window must be non-zero".into()));
        }
        if self.min_window > self.estimate_window {
            return Err(InvalidPolicy(format!(
                "min_window ({}) exceeds estimate_window ({})",
                self.min_window, self.estimate_window
            )));
        }
        if self.estimate_window > self.max_window {
            return Err(InvalidPolicy(format!(
                "estimate_window ({}) exceeds max_window ({})",
                self.estimate_window, self.max_window
            )));
        }
        if self.full_window > self.max_window {
            tracing::warn!(
                full_window = self.full_window,
                max_window = self.max_window,
                "full_window exceeds max_window; progress will plateau below 100%"
            );
        }
        Ok(())
    }

    /// Progress percentage for a buffer of `buffered` frames, clamped to `[0, 100]`.
    pub fn progress(&self, buffered: usize) -> f64 {
        (100.0 * buffered as f64 / self.full_window as f64).min(100.0)
    }

    /// Label for a given progress value.
    pub fn phase(&self, progress: f64) -> Phase {
        if progress < self.measuring_threshold_pct {
            Phase::Calibrating
        } else {
            Phase::Measuring
        }
    }

    /// Cadence gate: run the estimator on this frame?
    pub fn should_estimate(&self, frames_received: u64, buffered: usize) -> bool {
        frames_received > 0
            && frames_received % self.report_interval == 0
            && buffered >= self.min_window
    }
}
