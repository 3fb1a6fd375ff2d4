//! # pulse
//!
//! Heart-rate streaming server binary: loads settings, starts telemetry and
//! the metrics recorder, warms the shared estimator, and serves until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use pulse_core::Estimator;
use pulse_server::{PulseServer, ServerConfig, SessionHub};
use pulse_settings::{EstimatorSettings, LogFormat, PulseSettings};
use pulse_telemetry::{OutputFormat, TelemetryConfig};
use pulse_vision::{EstimatorHandle, ImageFrameDecoder, SpectralConfig, SpectralEstimator};
use tracing::Level;

/// Live heart-rate estimation server.
#[derive(Parser, Debug)]
#[command(name = "pulse", about = "Live heart-rate estimation server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file. Defaults to `~/.pulse/settings.json`.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log output: `json` or `text` (overrides settings).
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Cli {
    fn apply(&self, settings: &mut PulseSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn telemetry_config(settings: &PulseSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: pulse_telemetry::parse_level(&settings.logging.level).unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        format: match settings.logging.format {
            LogFormat::Json => OutputFormat::Json,
            LogFormat::Text => OutputFormat::Text,
        },
    }
}

fn server_config(settings: &PulseSettings) -> ServerConfig {
    let server = &settings.server;
    ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_connections: server.max_connections,
        heartbeat_interval: Duration::from_secs(server.heartbeat_interval_secs),
        heartbeat_timeout: Duration::from_secs(server.heartbeat_timeout_secs),
        max_message_size: server.max_message_size,
        send_queue: server.send_queue,
        estimate_timeout: Duration::from_millis(settings.estimator.timeout_ms),
        shutdown_timeout: Duration::from_secs(server.shutdown_timeout_secs),
    }
}

fn spectral_config(estimator: &EstimatorSettings) -> SpectralConfig {
    SpectralConfig {
        min_bpm: estimator.min_bpm,
        max_bpm: estimator.max_bpm,
        min_quality: estimator.min_quality,
        roi_fraction: estimator.roi_fraction,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Settings come first: they pick the log format and level.
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(pulse_settings::settings_path);
    let mut settings = pulse_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    cli.apply(&mut settings);

    let _telemetry = pulse_telemetry::init_telemetry(&telemetry_config(&settings))
        .context("Failed to initialize telemetry")?;
    let metrics = pulse_server::metrics::install_recorder();

    let spectral = spectral_config(&settings.estimator);
    let estimator = EstimatorHandle::new(move || {
        Ok(Arc::new(SpectralEstimator::new(spectral.clone())) as Arc<dyn Estimator>)
    });
    estimator
        .initialize()
        .await
        .context("Failed to load estimator")?;

    let config = server_config(&settings);
    let shutdown_timeout = config.shutdown_timeout;
    let hub = SessionHub::new(
        config,
        settings.window.clone(),
        Arc::new(ImageFrameDecoder::with_max_pixels(
            settings.estimator.max_frame_pixels,
        )),
        estimator,
    );
    let server = PulseServer::new(hub).with_metrics(metrics);
    let handle = server.listen().await.context("Failed to bind server")?;

    tracing::info!(
        addr = %handle.local_addr(),
        frame_rate = settings.window.frame_rate,
        min_window = settings.window.min_window,
        report_interval = settings.window.report_interval,
        "pulse listening on ws://{}/ws",
        handle.local_addr()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(vec![handle.into_task()], Some(shutdown_timeout))
        .await;
    tracing::info!("Shutdown complete");
    Ok(())
}
