//! Fair distributed mutual exclusion.
//!
//! Every contender creates one ephemeral sequential candidate under a shared
//! persistent lock root. The candidate with the smallest sequence number holds
//! the lock; everyone else waits for that node to be deleted and then looks
//! again. Sequence numbers are assigned by the store, so the lock is granted in
//! creation order. Candidates are ephemeral, so a crashed holder's session
//! ending releases the lock.
//!
//! Waiters watch the current holder rather than their predecessor: each
//! release wakes every waiter for one re-check.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use config::SessionConfig;
use coordination::{
    Connector, CoordinationClient, CoordinationError, CoordinationResult, CreateMode, EventType,
    KeeperState, Signal, SignalWait, WatchedEvent, Watcher, path, spawn_event_loop,
};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::metrics;
use crate::session::{ConnectGate, wait_connected};

/// Name prefix of candidate nodes under the lock root.
pub const LOCK_PROCESS_PREFIX: &str = "lp_";

/// One contender for a named lock. Owns its own session.
#[derive(Debug)]
pub struct DistributedLock<C: CoordinationClient> {
    client: C,
    lock_path: String,
    candidate_path: String,
    data: Vec<u8>,
    acquired: bool,
    released: bool,
    watcher: Arc<LockWatcher>,
    event_loop: JoinHandle<()>,
}

impl<C: CoordinationClient> DistributedLock<C> {
    /// Open a session, make sure `/<lock_name>` exists and register a
    /// candidate carrying `data`. Returns once the candidate exists.
    pub async fn new<K>(
        connector: &K,
        config: &SessionConfig,
        lock_name: &str,
        data: impl Into<Vec<u8>>,
    ) -> CoordinationResult<Self>
    where
        K: Connector<Client = C>,
    {
        path::validate_segment(lock_name)?;
        let (client, events) = connector.connect(config).await?;
        let (gate, connected) = ConnectGate::new();
        let watcher = Arc::new(LockWatcher {
            gate,
            pending: Mutex::new(None),
        });
        let event_loop = spawn_event_loop(events, Arc::clone(&watcher));

        // from here on, dropping `lock` on an error path closes the session
        let mut lock = Self {
            client,
            lock_path: path::join(path::ROOT, lock_name),
            candidate_path: String::new(),
            data: data.into(),
            acquired: false,
            released: false,
            watcher,
            event_loop,
        };
        wait_connected(connected, config.connect_timeout).await?;
        lock.ensure_root().await?;
        lock.candidate_path = lock
            .client
            .create_node(
                &path::join(&lock.lock_path, LOCK_PROCESS_PREFIX),
                CreateMode::EphemeralSequential,
                &lock.data,
            )
            .await?;
        info!(
            lock = %lock.lock_path,
            candidate = %lock.candidate_path,
            session_id = lock.client.session_id(),
            "lock candidate registered"
        );
        Ok(lock)
    }

    async fn ensure_root(&self) -> CoordinationResult<()> {
        if self.client.exists(&self.lock_path).await? {
            return Ok(());
        }
        match self
            .client
            .create_node(&self.lock_path, CreateMode::Persistent, &self.data)
            .await
        {
            Ok(root) => {
                info!(lock = %root, "created lock root");
                Ok(())
            }
            Err(err) if err.is_node_exists() => {
                debug!(lock = %self.lock_path, "lock root created concurrently");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Wait until this candidate is the smallest one.
    pub async fn acquire_lock(&mut self) -> CoordinationResult<()> {
        self.check_candidate()?;
        if self.acquired {
            return Ok(());
        }
        let started = Instant::now();
        loop {
            let holder = self.smallest_candidate().await?;
            if holder == self.candidate_path {
                break;
            }
            debug!(candidate = %self.candidate_path, %holder, "lock is held, waiting");

            let wake = self.watcher.arm(&holder);
            match self.client.add_watch(&holder).await {
                Ok(true) => {}
                Ok(false) => {
                    // holder left between listing and watching; the watch
                    // would only fire on a re-creation of that path
                    self.watcher.disarm();
                    self.client.remove_watch(&holder).await?;
                    trace!(%holder, "holder already gone, re-checking");
                    continue;
                }
                Err(err) => {
                    self.watcher.disarm();
                    return Err(err);
                }
            }
            metrics::LOCK_WAITS.inc();
            wake.wait().await?;
        }
        metrics::LOCK_WAIT_SECONDS.observe(started.elapsed().as_secs_f64());
        self.mark_acquired();
        Ok(())
    }

    /// Take the lock only if it is free right now. Never waits.
    pub async fn try_acquire_lock(&mut self) -> CoordinationResult<bool> {
        self.check_candidate()?;
        if !self.acquired && self.smallest_candidate().await? == self.candidate_path {
            self.mark_acquired();
        }
        Ok(self.acquired)
    }

    /// Delete the candidate node, letting the next contender in. Fails with
    /// `IllegalState` without touching the store if the lock is not held.
    pub async fn release_lock(&mut self) -> CoordinationResult<()> {
        if !self.acquired {
            return Err(CoordinationError::IllegalState(
                "lock needs to be acquired first to release".into(),
            ));
        }
        self.client.delete(&self.candidate_path).await?;
        self.acquired = false;
        self.released = true;
        metrics::LOCK_RELEASED.inc();
        info!(candidate = %self.candidate_path, "lock released");
        Ok(())
    }

    /// Payload of the current holder's candidate. Leaves a watch on it.
    pub async fn lock_holder_data(&self) -> CoordinationResult<Vec<u8>> {
        let holder = self.smallest_candidate().await?;
        self.client.get_data(&holder, true).await
    }

    /// Payloads of every other candidate, in listing order.
    pub async fn others_data(&self) -> CoordinationResult<Vec<Vec<u8>>> {
        let mut data = Vec::new();
        for child in self.candidates().await? {
            let candidate = path::join(&self.lock_path, &child);
            if candidate == self.candidate_path {
                continue;
            }
            match self.client.get_data(&candidate, false).await {
                Ok(payload) => data.push(payload),
                // left after the listing
                Err(err) if err.is_no_node() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(data)
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// `/<lock_name>`
    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    /// Full path of this contender's candidate node.
    pub fn candidate_path(&self) -> &str {
        &self.candidate_path
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn session_id(&self) -> u64 {
        self.client.session_id()
    }

    /// End the session. The candidate goes with it, held or not.
    pub async fn close(self) -> CoordinationResult<()> {
        self.client.close().await
    }

    fn check_candidate(&self) -> CoordinationResult<()> {
        if self.released {
            return Err(CoordinationError::IllegalState(format!(
                "candidate {} was released, create a new lock to contend again",
                self.candidate_path
            )));
        }
        Ok(())
    }

    fn mark_acquired(&mut self) {
        self.acquired = true;
        metrics::LOCK_ACQUIRED.inc();
        info!(candidate = %self.candidate_path, "lock acquired");
    }

    async fn candidates(&self) -> CoordinationResult<Vec<String>> {
        let mut children = self.client.get_children(&self.lock_path).await?;
        children.retain(|child| child.starts_with(LOCK_PROCESS_PREFIX));
        Ok(children)
    }

    async fn smallest_candidate(&self) -> CoordinationResult<String> {
        self.candidates()
            .await?
            .into_iter()
            .min()
            .map(|child| path::join(&self.lock_path, &child))
            .ok_or_else(|| {
                CoordinationError::NoNode(format!("no lock candidates under {}", self.lock_path))
            })
    }
}

impl<C: CoordinationClient> Drop for DistributedLock<C> {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

/// Watch handling for one lock session.
#[derive(Debug)]
struct LockWatcher {
    gate: ConnectGate,
    /// the node an acquire is currently parked on
    pending: Mutex<Option<PendingWake>>,
}

#[derive(Debug)]
struct PendingWake {
    path: String,
    signal: Signal,
}

impl LockWatcher {
    /// Install a fresh wake-up for the deletion of `path`.
    fn arm(&self, path: &str) -> SignalWait {
        let (signal, wait) = Signal::pair();
        *self.pending.lock() = Some(PendingWake {
            path: path.to_owned(),
            signal,
        });
        wait
    }

    fn disarm(&self) {
        self.pending.lock().take();
    }
}

#[async_trait]
impl Watcher for LockWatcher {
    async fn process(&self, event: WatchedEvent) {
        if event.is_connected() {
            if self.gate.open() {
                debug!("lock session connected");
            }
            return;
        }
        match (event.kind, event.state) {
            (EventType::NodeDeleted, _) => {
                let mut pending = self.pending.lock();
                let watched = pending
                    .as_ref()
                    .is_some_and(|wake| event.path.as_deref() == Some(wake.path.as_str()));
                if watched {
                    if let Some(wake) = pending.take() {
                        debug!(path = %wake.path, "lock holder left, re-checking");
                        wake.signal.fire();
                    }
                }
            }
            (EventType::None, KeeperState::Expired | KeeperState::Closed) => {
                warn!(state = ?event.state, "lock session ended, interrupting waiters");
                self.gate.abandon();
                self.disarm();
            }
            _ => trace!(?event, "ignoring event"),
        }
    }
}
