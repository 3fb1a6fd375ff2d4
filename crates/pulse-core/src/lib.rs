//! # pulse-core
//!
//! Shared types for the pulse heart-rate streaming service.
//!
//! - Branded identifiers (`SessionId`, `ClientId`)
//! - Decoded [`Frame`] representation
//! - [`WindowPolicy`]: the buffering and cadence constants, documented together
//! - Wire contract: inbound [`Command`] and outbound [`Report`]
//! - Error taxonomy for decode, estimation, protocol, and session faults
//! - Collaborator traits: [`FrameDecoder`] and [`Estimator`]

#![deny(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod ids;
pub mod messages;
pub mod policy;
pub mod traits;

pub use errors::{DecodeError, EstimationError, ProtocolError, SessionFatalError};
pub use frame::Frame;
pub use ids::{ClientId, SessionId};
pub use messages::{Command, Phase, Report};
pub use policy::WindowPolicy;
pub use traits::{Estimator, FrameDecoder, Reading};
