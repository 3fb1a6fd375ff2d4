//! WebSocket connection management, heartbeat, and the per-connection session loop.

pub mod connection;
pub mod heartbeat;
pub mod hub;
pub mod registry;
pub mod session;
