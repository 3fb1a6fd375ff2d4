//! WebSocket client connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use pulse_core::{ClientId, Report, SessionId};
use tokio::sync::mpsc;
use tracing::warn;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// One connected client and the session bound to it.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ClientId,
    /// The session this connection owns for its whole life.
    pub session_id: SessionId,
    /// Send channel to the connection's write task.
    tx: mpsc::Sender<String>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// Whether the client has shown activity since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_pong: Mutex<Instant>,
    /// Count of messages dropped due to a full or closed channel.
    pub dropped_messages: AtomicU64,
    active: AtomicBool,
}

impl ClientConnection {
    pub fn new(id: ClientId, session_id: SessionId, tx: mpsc::Sender<String>) -> Self {
        let now = Instant::now();
        Self {
            id,
            session_id,
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Queue a text message without waiting.
    ///
    /// Returns `false` if the channel is full or closed, and increments
    /// the dropped message counter.
    pub fn send(&self, message: String) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            counter!(WS_SEND_DROPS_TOTAL).increment(1);
            false
        }
    }

    /// Queue a report, waiting for room so reports keep their order.
    ///
    /// Returns `false` once the write task is gone.
    pub async fn send_report(&self, report: &Report) -> bool {
        match report.to_json() {
            Ok(json) => self.tx.send(json).await.is_ok(),
            Err(e) => {
                warn!(client_id = %self.id, error = %e, "failed to serialize report");
                false
            }
        }
    }

    /// Best-effort report delivery for teardown paths.
    pub fn try_send_report(&self, report: &Report) -> bool {
        report.to_json().is_ok_and(|json| self.send(json))
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record client activity (pong or any inbound message).
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_pong.lock() = Instant::now();
    }

    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection was alive since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Whether the session is calibrating or measuring.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
