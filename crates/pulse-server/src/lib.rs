//! # pulse-server
//!
//! Axum HTTP + `WebSocket` front end for live heart-rate sessions.
//!
//! - `GET /ws` (alias `/ws/rppg`): one measurement session per connection
//! - `GET /health`: liveness plus estimator readiness
//! - `GET /metrics`: Prometheus exposition
//! - Heartbeat pings, connection limits, graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use server::{PulseServer, ServerHandle};
pub use shutdown::ShutdownCoordinator;
pub use websocket::hub::SessionHub;
