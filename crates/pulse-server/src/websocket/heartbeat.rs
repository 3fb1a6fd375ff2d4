//! Heartbeat liveness monitoring.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use super::connection::ClientConnection;

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// The client stopped responding within the timeout window.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
}

/// Watch a connection's alive flag until it goes quiet or `cancel` fires.
///
/// Every `interval` the flag is checked and cleared. Pongs and inbound
/// messages set it again. After `timeout / interval` consecutive quiet
/// checks (at least one) the connection is reported dead.
pub async fn run_heartbeat(
    connection: Arc<ClientConnection>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut check_interval = time::interval(interval);
    let mut missed: u32 = 0;
    let max_missed = (timeout.as_millis() / interval.as_millis().max(1)).max(1) as u32;

    loop {
        tokio::select! {
            _ = check_interval.tick() => {
                if connection.check_alive() {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= max_missed {
                        return HeartbeatResult::TimedOut;
                    }
                }
            }
            () = cancel.cancelled() => return HeartbeatResult::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{ClientId, SessionId};
    use tokio::sync::mpsc;

    fn make_connection() -> Arc<ClientConnection> {
        let (tx, _rx) = mpsc::channel(32);
        Arc::new(ClientConnection::new(ClientId::new(), SessionId::new(), tx))
    }

    #[tokio::test]
    async fn heartbeat_cancelled() {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            make_connection(),
            Duration::from_secs(100),
            Duration::from_secs(300),
            cancel.clone(),
        ));
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_times_out() {
        let result = run_heartbeat(
            make_connection(),
            Duration::from_secs(1),
            Duration::from_secs(2),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn active_connection_stays_up() {
        let conn = make_connection();
        let cancel = CancellationToken::new();
        let monitor = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Duration::from_secs(1),
            Duration::from_secs(2),
            cancel.clone(),
        ));

        for _ in 0..10 {
            conn.mark_alive();
            time::sleep(Duration::from_millis(500)).await;
        }
        assert!(!monitor.is_finished());

        cancel.cancel();
        assert_eq!(monitor.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_shorter_than_interval_allows_one_miss() {
        let started = time::Instant::now();
        let result = run_heartbeat(
            make_connection(),
            Duration::from_secs(5),
            Duration::from_secs(1),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TimedOut);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }
}
