//! Two-phase commit over a coordination store.
//!
//! A transaction is a persistent root node `/<transaction id>`. Each
//! participant registers an ephemeral child `txp_<participant id>` and writes
//! its vote into it. The coordinator reads every vote, writes the global
//! decision into the root and finally deletes the root with its subtree.
//! Participants watch the root and report the decision to their
//! [`DecisionListener`].
//!
//! Both roles share [`TxSession`]: one store session, its event loop, and a
//! connected barrier. What differs between them is the watcher plugged into the
//! loop and the operations they expose.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use config::SessionConfig;
use coordination::{
    Connector, CoordinationClient, CoordinationResult, WatchedEvent, Watcher, spawn_event_loop,
};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::session::{ConnectGate, wait_connected};

mod coordinator;
mod participant;

pub use coordinator::DistributedTxCoordinator;
pub use participant::DistributedTxParticipant;

pub const VOTE_COMMIT: &str = "vote_commit";
pub const VOTE_ABORT: &str = "vote_abort";
pub const GLOBAL_COMMIT: &str = "global_commit";
pub const GLOBAL_ABORT: &str = "global_abort";

/// Name prefix of participant nodes under a transaction root.
pub const PARTICIPANT_PREFIX: &str = "txp_";

/// A participant's vote, written into its own node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vote {
    Commit,
    Abort,
}

impl Vote {
    pub fn as_payload(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Commit => VOTE_COMMIT,
            Vote::Abort => VOTE_ABORT,
        }
    }
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coordinator's global decision, written into the transaction root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Commit,
    Abort,
}

impl Decision {
    /// Parse a root payload. Anything but the two decision strings is `None`.
    pub fn from_payload(data: &[u8]) -> Option<Self> {
        match data {
            b if b == GLOBAL_COMMIT.as_bytes() => Some(Decision::Commit),
            b if b == GLOBAL_ABORT.as_bytes() => Some(Decision::Abort),
            _ => None,
        }
    }

    pub fn as_payload(&self) -> &'static [u8] {
        self.as_str().as_bytes()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Commit => GLOBAL_COMMIT,
            Decision::Abort => GLOBAL_ABORT,
        }
    }

    /// Metric label.
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Decision::Commit => "commit",
            Decision::Abort => "abort",
        }
    }

    /// Deliver this decision to `listener`.
    pub fn notify(&self, listener: &dyn DecisionListener) {
        match self {
            Decision::Commit => listener.on_global_commit(),
            Decision::Abort => listener.on_global_abort(),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application callbacks for the outcome of a transaction. Called from the
/// session's event task (participants) or from the caller's task
/// (coordinator), so implementations must not block.
pub trait DecisionListener: Send + Sync + 'static {
    fn on_global_commit(&self);
    fn on_global_abort(&self);
}

/// Which side of the protocol a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxRole {
    Coordinator,
    Participant,
}

impl TxRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxRole::Coordinator => "coordinator",
            TxRole::Participant => "participant",
        }
    }
}

impl fmt::Display for TxRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coordinator-side view of the current transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TxState {
    #[default]
    Idle,
    Open,
    Committed,
    Aborted,
}

impl From<Decision> for TxState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Commit => TxState::Committed,
            Decision::Abort => TxState::Aborted,
        }
    }
}

/// The store session behind one transaction role.
#[derive(Debug)]
pub struct TxSession<C: CoordinationClient> {
    role: TxRole,
    client: C,
    event_loop: JoinHandle<()>,
}

impl<C: CoordinationClient> TxSession<C> {
    /// Connect, start the event loop with the watcher `make_watcher` builds
    /// around the new client, and wait for the session to come up.
    pub(crate) async fn open<K, W, F>(
        role: TxRole,
        connector: &K,
        config: &SessionConfig,
        make_watcher: F,
    ) -> CoordinationResult<Self>
    where
        K: Connector<Client = C>,
        W: Watcher,
        F: FnOnce(C) -> W,
    {
        let (client, events) = connector.connect(config).await?;
        let (gate, connected) = ConnectGate::new();
        let watcher = Arc::new(RoleWatcher {
            role,
            gate,
            inner: make_watcher(client.clone()),
        });
        let session = Self {
            role,
            event_loop: spawn_event_loop(events, watcher),
            client,
        };
        wait_connected(connected, config.connect_timeout).await?;
        Ok(session)
    }

    pub fn role(&self) -> TxRole {
        self.role
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn session_id(&self) -> u64 {
        self.client.session_id()
    }

    pub(crate) async fn close(&self) -> CoordinationResult<()> {
        self.client.close().await
    }
}

impl<C: CoordinationClient> Drop for TxSession<C> {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Opens the connected barrier, then hands every other event to the role.
struct RoleWatcher<W> {
    role: TxRole,
    gate: ConnectGate,
    inner: W,
}

#[async_trait]
impl<W: Watcher> Watcher for RoleWatcher<W> {
    async fn process(&self, event: WatchedEvent) {
        if event.is_connected() {
            if self.gate.open() {
                debug!(role = %self.role, "transaction session connected");
            }
            return;
        }
        self.inner.process(event).await;
    }
}
