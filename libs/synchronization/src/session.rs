//! The one-time "session connected" barrier shared by every recipe.

use std::time::Duration;

use coordination::{CoordinationError, CoordinationResult, Signal, SignalWait};
use parking_lot::Mutex;

/// Holds the connected signal until the session reports `SyncConnected`.
#[derive(Debug)]
pub(crate) struct ConnectGate(Mutex<Option<Signal>>);

impl ConnectGate {
    pub(crate) fn new() -> (Self, SignalWait) {
        let (signal, wait) = Signal::pair();
        (Self(Mutex::new(Some(signal))), wait)
    }

    /// Release the waiter. Only the first call has an effect.
    pub(crate) fn open(&self) -> bool {
        match self.0.lock().take() {
            Some(signal) => {
                signal.fire();
                true
            }
            None => false,
        }
    }

    /// Fail the waiter, if it is still waiting.
    pub(crate) fn abandon(&self) {
        self.0.lock().take();
    }
}

/// Wait for the gate to open, bounded by `timeout`.
pub(crate) async fn wait_connected(wait: SignalWait, timeout: Duration) -> CoordinationResult<()> {
    match tokio::time::timeout(timeout, wait.wait()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(CoordinationError::Connection(
            "session ended before it connected".into(),
        )),
        Err(_) => Err(CoordinationError::Connection(format!(
            "session not connected within {timeout:?}"
        ))),
    }
}
