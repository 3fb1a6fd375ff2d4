//! Metric names recorded by sessions. The server installs the recorder.

/// Frames decoded and buffered (counter).
pub const FRAMES_RECEIVED_TOTAL: &str = "frames_received_total";
/// Frame payloads that failed to decode (counter).
pub const FRAME_DECODE_ERRORS_TOTAL: &str = "frame_decode_errors_total";
/// Estimator invocations (counter).
pub const ESTIMATIONS_TOTAL: &str = "estimations_total";
/// Failed estimations (counter, labels: kind).
pub const ESTIMATION_ERRORS_TOTAL: &str = "estimation_errors_total";
/// Estimation wall time (histogram).
pub const ESTIMATION_DURATION_SECONDS: &str = "estimation_duration_seconds";
/// Runs moved to `Errored` (counter).
pub const SESSION_FAULTS_TOTAL: &str = "session_faults_total";
/// Sessions currently in `Measuring` (gauge).
pub const SESSIONS_MEASURING: &str = "sessions_measuring";
