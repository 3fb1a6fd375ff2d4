//! Built-in [`Estimator`]: POS pulse extraction + spectral peak picking.

use std::sync::Arc;

use async_trait::async_trait;
use pulse_core::{EstimationError, Estimator, Frame, Reading};
use tracing::debug;

use crate::signal::{POS_WINDOW_SECS, dominant_frequency, mean_rgb, pos_projection};

/// Fewest frames the estimator will look at.
const MIN_FRAMES: usize = 32;

/// Tuning for [`SpectralEstimator`].
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralConfig {
    /// Lowest plausible heart rate, in BPM.
    pub min_bpm: f64,
    /// Highest plausible heart rate, in BPM.
    pub max_bpm: f64,
    /// Readings below this quality are reported without a rate.
    pub min_quality: f64,
    /// Centred fraction of each frame averaged per sample.
    pub roi_fraction: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            min_bpm: 42.0,
            max_bpm: 210.0,
            min_quality: 0.0,
            roi_fraction: 0.5,
        }
    }
}

/// Stateless heart-rate estimator; safe to share across sessions.
///
/// The number crunching runs on `spawn_blocking`, so a caller that gives up
/// (timeout, interrupt) simply stops waiting while the work finishes and is
/// dropped in the background.
#[derive(Clone, Debug, Default)]
pub struct SpectralEstimator {
    config: SpectralConfig,
}

impl SpectralEstimator {
    pub fn new(config: SpectralConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    /// Synchronous analysis of an ordered frame window.
    pub fn analyze(&self, frames: &[Arc<Frame>], frame_rate: f64) -> Result<Reading, EstimationError> {
        if !(frame_rate.is_finite() && frame_rate > 0.0) {
            return Err(EstimationError::Failed(format!(
                "invalid frame rate: {frame_rate}"
            )));
        }
        if frames.len() < MIN_FRAMES {
            return Err(EstimationError::Failed(format!(
                "window too short: {} frames, need at least {MIN_FRAMES}",
                frames.len()
            )));
        }

        let trace: Vec<[f64; 3]> = frames
            .iter()
            .map(|f| mean_rgb(f, self.config.roi_fraction))
            .collect();
        let window_len = (POS_WINDOW_SECS * frame_rate).ceil() as usize;
        let pulse = pos_projection(&trace, window_len);

        let Some(peak) = dominant_frequency(
            &pulse,
            frame_rate,
            self.config.min_bpm / 60.0,
            self.config.max_bpm / 60.0,
        ) else {
            debug!(frames = frames.len(), "no pulse signal in window");
            return Ok(Reading::undetected(0.0));
        };

        let bpm = peak.frequency * 60.0;
        if peak.quality < self.config.min_quality {
            debug!(bpm, quality = peak.quality, "peak below quality floor");
            return Ok(Reading::undetected(peak.quality));
        }
        Ok(Reading::new(Some(bpm), peak.quality))
    }
}

#[async_trait]
impl Estimator for SpectralEstimator {
    async fn estimate(
        &self,
        frames: Vec<Arc<Frame>>,
        frame_rate: f64,
    ) -> Result<Reading, EstimationError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.analyze(&frames, frame_rate))
            .await
            .map_err(|e| EstimationError::Failed(format!("estimation task: {e}")))?
    }
}
