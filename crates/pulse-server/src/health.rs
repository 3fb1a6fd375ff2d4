//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "rppg";

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"healthy"` when the server is running.
    pub status: String,
    /// Fixed service identifier.
    pub service: String,
    /// Whether the shared estimator has finished loading.
    pub model_loaded: bool,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Current WebSocket connection count.
    pub connections: usize,
    /// Connections whose session is calibrating or measuring.
    pub active_sessions: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    model_loaded: bool,
    connections: usize,
    sessions: usize,
) -> HealthResponse {
    HealthResponse {
        status: "healthy".into(),
        service: SERVICE_NAME.into(),
        model_loaded,
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        active_sessions: sessions,
    }
}
