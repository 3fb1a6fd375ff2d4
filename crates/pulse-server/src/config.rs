//! Server configuration.

use std::time::Duration;

/// Network, connection, and session-runtime settings for [`crate::PulseServer`].
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Port to listen on. `0` picks a free port.
    pub port: u16,
    /// Concurrent WebSocket connections; further upgrades get 503.
    pub max_connections: usize,
    /// Interval between server pings.
    pub heartbeat_interval: Duration,
    /// A connection silent for this long is closed.
    pub heartbeat_timeout: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue: usize,
    /// Bound on a single estimator call.
    pub estimate_timeout: Duration,
    /// How long shutdown waits for connections to drain.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8001,
            max_connections: 64,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            max_message_size: 8 * 1024 * 1024,
            send_queue: 256,
            estimate_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Upgrade-level frame limit handed to axum.
    ///
    /// Kept above `max_message_size` so oversize messages reach the session
    /// loop and fault the run instead of tearing down the socket.
    pub fn transport_message_limit(&self) -> usize {
        self.max_message_size.saturating_mul(2)
    }
}
