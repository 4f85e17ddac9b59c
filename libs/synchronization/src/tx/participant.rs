use std::sync::Arc;

use async_trait::async_trait;
use config::SessionConfig;
use coordination::{
    Connector, CoordinationClient, CoordinationError, CoordinationResult, CreateMode, EventType,
    WatchedEvent, Watcher, path,
};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::{Decision, DecisionListener, PARTICIPANT_PREFIX, TxRole, TxSession, Vote};
use crate::metrics;

/// Joins transactions, votes, and reports the coordinator's decision.
pub struct DistributedTxParticipant<K: Connector> {
    connector: K,
    config: SessionConfig,
    listener: Arc<dyn DecisionListener>,
    session: Option<TxSession<K::Client>>,
    state: Arc<Mutex<Membership>>,
}

/// Shared with the watcher, which clears it when the root goes away.
#[derive(Debug, Default, Clone)]
struct Membership {
    /// `/<transaction id>`
    root: Option<String>,
    /// `/<transaction id>/txp_<participant id>`
    node: Option<String>,
}

impl Membership {
    fn clear(&mut self) {
        self.root = None;
        self.node = None;
    }
}

impl<K: Connector> std::fmt::Debug for DistributedTxParticipant<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTxParticipant")
            .field("session", &self.session)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl<K: Connector> DistributedTxParticipant<K> {
    /// No session is opened until the first [`start`](Self::start).
    pub fn new(
        connector: K,
        config: SessionConfig,
        listener: Arc<dyn DecisionListener>,
    ) -> Self {
        Self {
            connector,
            config,
            listener,
            session: None,
            state: Arc::new(Mutex::new(Membership::default())),
        }
    }

    /// Register `txp_<participant_id>` under an existing transaction root and
    /// watch the root for the decision. Fails with `NoNode` if the
    /// transaction does not exist.
    pub async fn start(
        &mut self,
        transaction_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<()> {
        path::validate_segment(transaction_id)?;
        path::validate_segment(participant_id)?;
        if let Some(node) = &self.state.lock().node {
            return Err(CoordinationError::IllegalState(format!(
                "already part of transaction through {node}"
            )));
        }
        let root = path::join(path::ROOT, transaction_id);
        let node = path::join(&root, &format!("{PARTICIPANT_PREFIX}{participant_id}"));
        let client = self.session().await?.client().clone();

        if let Err(err) = client.create_node(&node, CreateMode::Ephemeral, b"").await {
            warn!(?err, participant = %node, "failed to join transaction");
            return Err(err);
        }
        // record membership before arming, the watcher matches events on it
        *self.state.lock() = Membership {
            root: Some(root.clone()),
            node: Some(node.clone()),
        };
        let armed = match client.add_watch(&root).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(CoordinationError::NoNode(format!(
                "transaction {root} removed while joining"
            ))),
            Err(err) => Err(err),
        };
        if let Err(err) = armed {
            warn!(?err, transaction = %root, "failed to watch transaction");
            self.state.lock().clear();
            if let Err(err) = client.delete(&node).await {
                debug!(?err, participant = %node, "participant node already gone");
            }
            return Err(err);
        }

        info!(transaction = %root, participant = %node, "joined transaction");
        metrics::TX_STARTED
            .with_label_values(&[TxRole::Participant.as_str()])
            .inc();
        Ok(())
    }

    /// Write `vote_commit` into this participant's node. No-op when not
    /// part of a transaction.
    pub async fn vote_commit(&self) -> CoordinationResult<()> {
        self.vote(Vote::Commit).await
    }

    /// Write `vote_abort` into this participant's node. No-op when not part
    /// of a transaction.
    pub async fn vote_abort(&self) -> CoordinationResult<()> {
        self.vote(Vote::Abort).await
    }

    /// Path of this participant's node in the open transaction.
    pub fn current_transaction(&self) -> Option<String> {
        self.state.lock().node.clone()
    }

    /// Path of the open transaction's root.
    pub fn transaction_root(&self) -> Option<String> {
        self.state.lock().root.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().node.is_some()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(TxSession::session_id)
    }

    /// End the session, which removes this participant's node.
    pub async fn close(&mut self) -> CoordinationResult<()> {
        self.state.lock().clear();
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    async fn vote(&self, vote: Vote) -> CoordinationResult<()> {
        let Some(node) = self.current_transaction() else {
            trace!(%vote, "not part of a transaction, vote not cast");
            return Ok(());
        };
        let client = self
            .session
            .as_ref()
            .map(|session| session.client().clone())
            .ok_or_else(|| CoordinationError::SessionClosed("participant session closed".into()))?;
        if let Err(err) = client.write(&node, vote.as_payload()).await {
            warn!(?err, participant = %node, %vote, "failed to cast vote");
            return Err(err);
        }
        info!(participant = %node, %vote, "vote cast");
        metrics::TX_VOTES.with_label_values(&[vote.as_str()]).inc();
        Ok(())
    }

    async fn session(&mut self) -> CoordinationResult<&TxSession<K::Client>> {
        if self.session.is_none() {
            let state = Arc::clone(&self.state);
            let listener = Arc::clone(&self.listener);
            let session = TxSession::open(
                TxRole::Participant,
                &self.connector,
                &self.config,
                |client| ParticipantWatcher {
                    client,
                    state,
                    listener,
                },
            )
            .await?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .ok_or_else(|| CoordinationError::SessionClosed("participant session missing".into()))
    }
}

/// Turns changes of the transaction root into listener calls.
struct ParticipantWatcher<C> {
    client: C,
    state: Arc<Mutex<Membership>>,
    listener: Arc<dyn DecisionListener>,
}

impl<C: CoordinationClient> ParticipantWatcher<C> {
    async fn on_root_changed(&self, root: &str) {
        // re-arm while reading, the next change must not be missed
        let data = match self.client.get_data(root, true).await {
            Ok(data) => data,
            Err(err) if err.is_no_node() => {
                // removed before the decision could be read; no watch is
                // left on a missing node, so no deletion event follows
                info!(transaction = %root, "transaction removed before its decision was read");
                self.leave(root);
                return;
            }
            Err(err) => {
                warn!(?err, transaction = %root, "failed to read transaction decision");
                return;
            }
        };
        match Decision::from_payload(&data) {
            Some(decision) => {
                info!(transaction = %root, %decision, "global decision received");
                metrics::TX_DECISIONS
                    .with_label_values(&[TxRole::Participant.as_str(), decision.label()])
                    .inc();
                decision.notify(self.listener.as_ref());
            }
            None => warn!(
                transaction = %root,
                payload = %String::from_utf8_lossy(&data),
                "unknown data change in the transaction root"
            ),
        }
    }

    /// Forget `root`, unless a newer transaction was joined meanwhile.
    fn leave(&self, root: &str) {
        let mut state = self.state.lock();
        if state.root.as_deref() == Some(root) {
            state.clear();
        }
    }
}

#[async_trait]
impl<C: CoordinationClient> Watcher for ParticipantWatcher<C> {
    async fn process(&self, event: WatchedEvent) {
        let Some(root) = self.state.lock().root.clone() else {
            trace!(?event, "not part of a transaction, ignoring event");
            return;
        };
        if event.is_for(EventType::NodeDataChanged, &root) {
            self.on_root_changed(&root).await;
        } else if event.is_for(EventType::NodeDeleted, &root) {
            info!(transaction = %root, "transaction removed, leaving it");
            self.leave(&root);
        } else {
            trace!(?event, "ignoring event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coordination::MemoryStore;
    use tracing_test::traced_test;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder(Mutex<Vec<Decision>>);

    impl DecisionListener for Recorder {
        fn on_global_commit(&self) {
            self.0.lock().push(Decision::Commit);
        }
        fn on_global_abort(&self) {
            self.0.lock().push(Decision::Abort);
        }
    }

    fn participant(
        store: &MemoryStore,
    ) -> (DistributedTxParticipant<MemoryStore>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let participant = DistributedTxParticipant::new(
            store.clone(),
            SessionConfig::new("memory://local"),
            recorder.clone(),
        );
        (participant, recorder)
    }

    /// A bare session acting as the coordinator.
    async fn open_root(store: &MemoryStore, root: &str) -> coordination::MemorySession {
        let (client, _events) = store
            .connect(&SessionConfig::new("memory://local"))
            .await
            .unwrap();
        client
            .create_node(root, CreateMode::Persistent, b"")
            .await
            .unwrap();
        client
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_start_registers_node() {
        let store = MemoryStore::new();
        let _coordinator = open_root(&store, "/tx-1").await;
        let (mut participant, _) = participant(&store);

        participant.start("tx-1", "p1").await.unwrap();
        assert!(participant.is_open());
        assert_eq!(participant.current_transaction().as_deref(), Some("/tx-1/txp_p1"));
        assert_eq!(participant.transaction_root().as_deref(), Some("/tx-1"));
        assert_eq!(store.peek("/tx-1/txp_p1").unwrap(), b"");
        assert!(logs_contain("joined transaction"));
    }

    #[tokio::test]
    async fn test_start_missing_root() {
        let store = MemoryStore::new();
        let (mut participant, _) = participant(&store);

        let err = participant.start("tx-404", "p1").await.unwrap_err();
        assert!(err.is_no_node());
        assert!(!participant.is_open());
        assert_eq!(participant.current_transaction(), None);
    }

    #[tokio::test]
    async fn test_start_twice() {
        let store = MemoryStore::new();
        let _coordinator = open_root(&store, "/tx-1").await;
        let (mut participant, _) = participant(&store);
        participant.start("tx-1", "p1").await.unwrap();

        let err = participant.start("tx-1", "p1").await.unwrap_err();
        assert!(matches!(err, CoordinationError::IllegalState(_)));
        assert!(participant.is_open());
    }

    #[tokio::test]
    async fn test_votes_are_written() {
        let store = MemoryStore::new();
        let _coordinator = open_root(&store, "/tx-1").await;
        let (mut participant, _) = participant(&store);
        participant.start("tx-1", "p1").await.unwrap();

        participant.vote_commit().await.unwrap();
        assert_eq!(store.peek("/tx-1/txp_p1").unwrap(), b"vote_commit");
        participant.vote_abort().await.unwrap();
        assert_eq!(store.peek("/tx-1/txp_p1").unwrap(), b"vote_abort");
    }

    #[tokio::test]
    async fn test_vote_without_transaction_is_noop() {
        let store = MemoryStore::new();
        let (participant, _) = participant(&store);

        participant.vote_commit().await.unwrap();
        participant.vote_abort().await.unwrap();
        assert_eq!(store.node_count(), 0);
    }

    #[tokio::test]
    async fn test_decisions_reach_listener() {
        let store = MemoryStore::new();
        let coordinator = open_root(&store, "/tx-1").await;
        let (mut participant, recorder) = participant(&store);
        participant.start("tx-1", "p1").await.unwrap();

        coordinator.write("/tx-1", b"global_abort").await.unwrap();
        settle().await;
        assert_eq!(*recorder.0.lock(), vec![Decision::Abort]);

        // the watch was re-armed by the read
        coordinator.write("/tx-1", b"global_commit").await.unwrap();
        settle().await;
        assert_eq!(*recorder.0.lock(), vec![Decision::Abort, Decision::Commit]);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unknown_payload_is_ignored() {
        let store = MemoryStore::new();
        let coordinator = open_root(&store, "/tx-1").await;
        let (mut participant, recorder) = participant(&store);
        participant.start("tx-1", "p1").await.unwrap();

        coordinator.write("/tx-1", b"maybe").await.unwrap();
        settle().await;
        assert!(recorder.0.lock().is_empty());
        assert!(participant.is_open());
        assert!(logs_contain("unknown data change in the transaction root"));

        coordinator.write("/tx-1", b"global_commit").await.unwrap();
        settle().await;
        assert_eq!(*recorder.0.lock(), vec![Decision::Commit]);
    }

    #[tokio::test]
    async fn test_root_deletion_clears_state() {
        let store = MemoryStore::new();
        let coordinator = open_root(&store, "/tx-1").await;
        let (mut participant, recorder) = participant(&store);
        participant.start("tx-1", "p1").await.unwrap();

        coordinator.force_delete("/tx-1").await.unwrap();
        settle().await;
        assert!(!participant.is_open());
        assert_eq!(participant.transaction_root(), None);
        assert!(recorder.0.lock().is_empty());

        // free to join the next one
        let _next = open_root(&store, "/tx-2").await;
        participant.start("tx-2", "p1").await.unwrap();
        assert!(participant.is_open());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_commit_and_immediate_removal_closes_transaction() {
        let store = MemoryStore::new();
        let mut coordinator = crate::tx::DistributedTxCoordinator::new(
            store.clone(),
            SessionConfig::new("memory://local"),
            Arc::new(Recorder::default()),
        );
        coordinator.start("tx-1", "coord").await.unwrap();
        let (mut participant, _) = participant(&store);
        participant.start("tx-1", "p1").await.unwrap();
        participant.vote_commit().await.unwrap();

        // writes global_commit and deletes the root without yielding
        assert!(coordinator.perform().await.unwrap());
        settle().await;
        assert!(store.peek("/tx-1").is_none());
        assert!(!participant.is_open());
        assert_eq!(participant.transaction_root(), None);
        assert!(logs_contain("transaction removed before its decision was read"));

        coordinator.start("tx-2", "coord").await.unwrap();
        participant.start("tx-2", "p1").await.unwrap();
        assert_eq!(participant.current_transaction().as_deref(), Some("/tx-2/txp_p1"));
    }

    #[tokio::test]
    async fn test_close_removes_node() {
        let store = MemoryStore::new();
        let _coordinator = open_root(&store, "/tx-1").await;
        let (mut participant, _) = participant(&store);
        participant.start("tx-1", "p1").await.unwrap();

        participant.close().await.unwrap();
        assert!(!participant.is_open());
        assert!(store.peek("/tx-1/txp_p1").is_none());
        assert!(store.peek("/tx-1").is_some());
    }
}
