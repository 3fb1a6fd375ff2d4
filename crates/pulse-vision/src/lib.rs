//! # pulse-vision
//!
//! Concrete collaborators behind the `pulse-core` traits:
//!
//! - [`ImageFrameDecoder`]: base64 (optionally `data:` prefixed) image → RGB [`Frame`](pulse_core::Frame)
//! - [`SpectralEstimator`]: plane-orthogonal-to-skin pulse extraction + FFT peak picking
//! - [`EstimatorHandle`]: process-wide, init-once estimator shared by every session

#![deny(unsafe_code)]

pub mod decoder;
pub mod estimator;
pub mod handle;
pub mod signal;

pub use decoder::{DEFAULT_MAX_FRAME_PIXELS, ImageFrameDecoder};
pub use estimator::{SpectralConfig, SpectralEstimator};
pub use handle::EstimatorHandle;
