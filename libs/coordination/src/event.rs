//! Session and watch notifications.
//!
//! Every session owns one unbounded channel on which the store pushes
//! connection-state changes and fired watches. [`spawn_event_loop`] drains that
//! channel on a dedicated task and hands each event to a [`Watcher`], so watch
//! callbacks never run on the caller's task.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{CoordinationError, CoordinationResult};

/// What happened to the watched node, `None` for pure session-state events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    None,
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// Session state at the time the event was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeeperState {
    SyncConnected,
    Disconnected,
    Expired,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub kind: EventType,
    pub state: KeeperState,
    pub path: Option<String>,
}

impl WatchedEvent {
    /// The one-time "session is live" event.
    pub fn connected() -> Self {
        Self::session(KeeperState::SyncConnected)
    }

    /// A session-state change not tied to any node.
    pub fn session(state: KeeperState) -> Self {
        Self {
            kind: EventType::None,
            state,
            path: None,
        }
    }

    /// A fired watch on `path`.
    pub fn node<S: Into<String>>(kind: EventType, path: S) -> Self {
        Self {
            kind,
            state: KeeperState::SyncConnected,
            path: Some(path.into()),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.kind == EventType::None && self.state == KeeperState::SyncConnected
    }

    /// true if this is a `kind` event for exactly `path`
    pub fn is_for(&self, kind: EventType, path: &str) -> bool {
        self.kind == kind && self.path.as_deref() == Some(path)
    }
}

/// Sending half handed to the store.
pub type EventSender = mpsc::UnboundedSender<WatchedEvent>;
/// Receiving half returned from a connect.
pub type WatchEvents = mpsc::UnboundedReceiver<WatchedEvent>;

/// Create the notification channel for one session.
pub fn channel() -> (EventSender, WatchEvents) {
    mpsc::unbounded_channel()
}

/// Receives session and watch notifications.
#[async_trait]
pub trait Watcher: Send + Sync + 'static {
    async fn process(&self, event: WatchedEvent);
}

/// Drive `watcher` with every event from `events`, one at a time, until the
/// session's channel closes.
pub fn spawn_event_loop<W>(mut events: WatchEvents, watcher: Arc<W>) -> JoinHandle<()>
where
    W: Watcher + ?Sized,
{
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            trace!(?event, "dispatching watch event");
            watcher.process(event).await;
        }
        debug!("watch event channel closed, event loop exiting");
    })
}

/// Single-use wake-up. Firing consumes it, so one signal can satisfy at most
/// one wait.
#[derive(Debug)]
pub struct Signal(oneshot::Sender<()>);

/// The waiting half of a [`Signal`].
#[derive(Debug)]
pub struct SignalWait(oneshot::Receiver<()>);

impl Signal {
    pub fn pair() -> (Signal, SignalWait) {
        let (tx, rx) = oneshot::channel();
        (Signal(tx), SignalWait(rx))
    }

    pub fn fire(self) {
        // the waiter may already be gone, nothing to wake then
        let _ = self.0.send(());
    }
}

impl SignalWait {
    /// Resolves once the paired [`Signal`] fires. Fails with
    /// `InterruptedWait` if the signal is dropped unfired.
    pub async fn wait(self) -> CoordinationResult<()> {
        self.0.await.map_err(|_| {
            CoordinationError::InterruptedWait("wake-up signal dropped before firing".into())
        })
    }
}
