//! # pulse-telemetry
//!
//! `tracing` subscriber setup. Output is JSON lines by default (or
//! human-readable text), filtered by `RUST_LOG` when set and otherwise by the
//! configured level plus per-module overrides. The filter sits behind a
//! reload handle so verbosity can change without a restart.

#![deny(unsafe_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Telemetry failures.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("tracing subscriber already initialized: {0}")]
    AlreadyInitialized(String),
    /// A filter directive did not parse.
    #[error("invalid filter directive: {0}")]
    InvalidFilter(String),
    /// The subscriber owning the filter is gone.
    #[error("failed to reload filter: {0}")]
    Reload(String),
}

/// Output rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `"pulse_session" => DEBUG`).
    pub module_levels: Vec<(String, Level)>,
    /// Output rendering.
    pub format: OutputFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            format: OutputFormat::Json,
        }
    }
}

/// Build a filter directive string from a level and module overrides.
pub fn filter_directive(level: Level, module_levels: &[(String, Level)]) -> String {
    let mut directive = level.to_string().to_lowercase();
    for (module, level) in module_levels {
        directive.push(',');
        directive.push_str(module);
        directive.push('=');
        directive.push_str(&level.to_string().to_lowercase());
    }
    directive
}

/// Parse a level name (`trace`, `debug`, `info`, `warn`, `error`).
pub fn parse_level(name: &str) -> Option<Level> {
    name.trim().parse().ok()
}

/// Handle returned by [`init_telemetry`] for runtime level changes.
pub struct TelemetryGuard {
    handle: reload::Handle<EnvFilter, Registry>,
    state: Arc<Mutex<(Level, Vec<(String, Level)>)>>,
}

impl TelemetryGuard {
    /// Change the default level, keeping module overrides.
    pub fn set_level(&self, level: Level) -> Result<(), TelemetryError> {
        let mut state = self.state.lock();
        state.0 = level;
        self.apply(&filter_directive(state.0, &state.1))
    }

    /// Change the level for one module at runtime.
    pub fn set_module_level(&self, module: &str, level: Level) -> Result<(), TelemetryError> {
        let mut state = self.state.lock();
        if let Some(entry) = state.1.iter_mut().find(|(m, _)| m == module) {
            entry.1 = level;
        } else {
            state.1.push((module.to_string(), level));
        }
        self.apply(&filter_directive(state.0, &state.1))
    }

    /// Replace the whole filter with a raw directive (`RUST_LOG` syntax).
    pub fn set_directive(&self, directive: &str) -> Result<(), TelemetryError> {
        self.apply(directive)
    }

    /// Current default level and module overrides.
    pub fn levels(&self) -> (Level, Vec<(String, Level)>) {
        self.state.lock().clone()
    }

    fn apply(&self, directive: &str) -> Result<(), TelemetryError> {
        let filter =
            EnvFilter::try_new(directive).map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?;
        self.handle
            .reload(filter)
            .map_err(|e| TelemetryError::Reload(e.to_string()))
    }
}

/// Build the subscriber without installing it.
pub fn build_subscriber(
    config: &TelemetryConfig,
) -> (impl Subscriber + Send + Sync + 'static, TelemetryGuard) {
    let directive = filter_directive(config.log_level, &config.module_levels);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));
    let (filter, handle) = reload::Layer::new(env_filter);

    let json = (config.format == OutputFormat::Json).then(|| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_span_list(true)
    });
    let text = (config.format == OutputFormat::Text).then(|| fmt::layer().with_target(true));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(text);

    let guard = TelemetryGuard {
        handle,
        state: Arc::new(Mutex::new((config.log_level, config.module_levels.clone()))),
    };
    (subscriber, guard)
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let (subscriber, guard) = build_subscriber(config);
    subscriber
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))?;
    Ok(guard)
}
