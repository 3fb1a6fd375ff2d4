//! Settings type definitions.
//!
//! All types use camelCase JSON and `#[serde(default)]`, so a partial file
//! only needs the keys it changes.

use pulse_core::WindowPolicy;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8001 },
///   "window": { "minWindow": 150, "reportInterval": 30 },
///   "estimator": { "timeoutMs": 5000 },
///   "logging": { "level": "info", "format": "json" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PulseSettings {
    /// Network and connection handling.
    pub server: ServerSettings,
    /// Buffering and cadence shared by every session.
    pub window: WindowPolicy,
    /// Estimator tuning.
    pub estimator: EstimatorSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl PulseSettings {
    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.window.validate()?;
        self.server.validate()?;
        self.estimator.validate()
    }
}

/// Server network and runtime settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP/WebSocket port.
    pub port: u16,
    /// Concurrent WebSocket connections accepted before upgrades get 503.
    pub max_connections: usize,
    /// Seconds between server pings.
    pub heartbeat_interval_secs: u64,
    /// Seconds without a pong before a connection is closed.
    pub heartbeat_timeout_secs: u64,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
    /// Outbound queue depth per connection.
    pub send_queue: usize,
    /// Seconds to wait for connections to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            max_connections: 64,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 60,
            max_message_size: 8 * 1024 * 1024,
            send_queue: 256,
            shutdown_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if self.heartbeat_timeout_secs < self.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) is shorter than the ping interval ({})",
                self.heartbeat_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        if self.send_queue == 0 || self.max_message_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueue and server.maxMessageSize must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Estimator tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EstimatorSettings {
    /// Upper bound on one estimation call, in milliseconds.
    pub timeout_ms: u64,
    /// Readings with quality below this report no rate.
    pub min_quality: f64,
    /// Lowest plausible heart rate.
    pub min_bpm: f64,
    /// Highest plausible heart rate.
    pub max_bpm: f64,
    /// Centred fraction of each frame used as the region of interest.
    pub roi_fraction: f64,
    /// Largest decoded frame accepted, in pixels (`width * height`).
    pub max_frame_pixels: u64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            min_quality: 0.0,
            min_bpm: 42.0,
            max_bpm: 210.0,
            roi_fraction: 0.5,
            max_frame_pixels: 1280 * 720,
        }
    }
}

impl EstimatorSettings {
    fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "estimator.timeoutMs must be non-zero".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_quality) {
            return Err(SettingsError::InvalidValue(format!(
                "estimator.minQuality must be within [0, 1], got {}",
                self.min_quality
            )));
        }
        if !(self.min_bpm > 0.0 && self.min_bpm < self.max_bpm) {
            return Err(SettingsError::InvalidValue(format!(
                "estimator bpm band is empty: [{}, {}]",
                self.min_bpm, self.max_bpm
            )));
        }
        if !(self.roi_fraction > 0.0 && self.roi_fraction <= 1.0) {
            return Err(SettingsError::InvalidValue(format!(
                "estimator.roiFraction must be within (0, 1], got {}",
                self.roi_fraction
            )));
        }
        if self.max_frame_pixels == 0 {
            return Err(SettingsError::InvalidValue(
                "estimator.maxFramePixels must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// Human-readable lines.
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" => Ok(Self::Text),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`, `debug`, `info`, `warn`, `error`). `RUST_LOG` wins.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}
