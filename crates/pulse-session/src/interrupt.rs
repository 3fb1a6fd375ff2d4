//! Cross-task interruption of the current run.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Shared handle that cancels whatever estimate the session is awaiting.
///
/// The connection reader calls [`interrupt`](Self::interrupt) as soon as it
/// sees `start`/`stop` (or the socket closes), before the command is queued.
/// Each interrupt swaps in a fresh token so the next run starts clean.
///
/// Frames are queued together with [`current`](Self::current), so a frame
/// still waiting ahead of a `stop` already holds a cancelled token and its
/// estimate ends as soon as it begins.
#[derive(Clone, Debug, Default)]
pub struct RunInterrupt {
    token: Arc<Mutex<CancellationToken>>,
}

impl RunInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current run's token and arm a new one.
    pub fn interrupt(&self) {
        let mut token = self.token.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Token for work started now.
    pub fn current(&self) -> CancellationToken {
        self.token.lock().clone()
    }
}
