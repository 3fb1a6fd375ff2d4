//! Error taxonomy.
//!
//! Decode, estimation, and protocol errors are local: they become a report (or
//! a log line) and the session carries on. Only [`SessionFatalError`] moves a
//! session to `Errored`, and even that keeps the connection open.

use std::time::Duration;

/// A single frame payload could not be turned into a [`Frame`](crate::Frame).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("empty frame payload")]
    Empty,
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("failed to decode image: {0}")]
    Image(String),
}

impl DecodeError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Base64(_) => "base64",
            Self::Image(_) => "image",
        }
    }
}

/// One estimation cycle failed. Buffer and counters are untouched.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EstimationError {
    /// The shared estimator could not be loaded.
    #[error("estimator unavailable: {0}")]
    Unavailable(String),
    /// The estimator ran and reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The estimator did not answer within the configured bound.
    #[error("estimation timed out after {0:?}")]
    Timeout(Duration),
    /// The run was interrupted by `start`/`stop` while the estimate was in flight.
    #[error("estimation cancelled")]
    Cancelled,
}

impl EstimationError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Failed(_) => "failed",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

/// An inbound message that does not map to a command.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("message carries no frame")]
    MissingFrame,
}

impl ProtocolError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "invalid_json",
            Self::UnknownAction(_) => "unknown_action",
            Self::MissingFrame => "missing_frame",
        }
    }
}

/// An unrecoverable fault for the current run.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SessionFatalError {
    /// The transport delivered something that cannot be a message at all.
    #[error("transport fault: {0}")]
    Transport(String),
    /// Internal bookkeeping no longer holds.
    #[error("invariant violated: {0}")]
    Invariant(String),
}
