//! Collaborator seams. A session only ever sees these traits, so tests can
//! swap in fakes and the service can swap estimators without touching the
//! controller.

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{DecodeError, EstimationError};
use crate::frame::Frame;

/// Output of one estimation cycle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reading {
    /// Beats per minute, absent when no rate could be derived.
    pub rate: Option<f64>,
    /// Signal quality in `[0, 1]`.
    pub quality: f64,
}

impl Reading {
    pub fn new(rate: Option<f64>, quality: f64) -> Self {
        Self { rate, quality }
    }

    /// A reading with no usable rate.
    pub fn undetected(quality: f64) -> Self {
        Self {
            rate: None,
            quality,
        }
    }
}

/// Turns one inbound payload into a [`Frame`].
///
/// Must be pure: no side effects on any session.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, payload: &str) -> Result<Frame, DecodeError>;
}

/// Heart-rate estimation over an ordered window of frames.
///
/// Implementations are shared by every session and must tolerate concurrent
/// calls. Frames arrive oldest-first.
#[async_trait]
pub trait Estimator: Send + Sync {
    async fn estimate(
        &self,
        frames: Vec<Arc<Frame>>,
        frame_rate: f64,
    ) -> Result<Reading, EstimationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    #[async_trait]
    impl Estimator for Fixed {
        async fn estimate(
            &self,
            frames: Vec<Arc<Frame>>,
            _frame_rate: f64,
        ) -> Result<Reading, EstimationError> {
            if frames.is_empty() {
                return Err(EstimationError::Failed("no frames".into()));
            }
            Ok(Reading::new(Some(self.0), 0.9))
        }
    }

    struct Blank;

    impl FrameDecoder for Blank {
        fn decode(&self, payload: &str) -> Result<Frame, DecodeError> {
            if payload.is_empty() {
                return Err(DecodeError::Empty);
            }
            Ok(Frame::solid(2, 2, [0, 0, 0]))
        }
    }

    #[tokio::test]
    async fn estimator_is_object_safe() {
        let est: Arc<dyn Estimator> = Arc::new(Fixed(64.0));
        let frames = vec![Arc::new(Frame::solid(1, 1, [1, 1, 1]))];
        let reading = est.estimate(frames, 30.0).await.unwrap();
        assert_eq!(reading.rate, Some(64.0));

        let err = est.estimate(Vec::new(), 30.0).await.unwrap_err();
        assert_eq!(err, EstimationError::Failed("no frames".into()));
    }

    #[test]
    fn decoder_is_object_safe() {
        let dec: Arc<dyn FrameDecoder> = Arc::new(Blank);
        assert!(dec.decode("x").is_ok());
        assert_eq!(dec.decode("").unwrap_err(), DecodeError::Empty);
    }

    #[test]
    fn undetected_has_no_rate() {
        let r = Reading::undetected(0.2);
        assert!(r.rate.is_none());
        assert_eq!(r.quality, 0.2);
    }
}
