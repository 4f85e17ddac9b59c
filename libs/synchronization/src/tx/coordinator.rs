use std::sync::Arc;

use async_trait::async_trait;
use config::SessionConfig;
use coordination::{
    Connector, CoordinationClient, CoordinationError, CoordinationResult, CreateMode,
    WatchedEvent, Watcher, path,
};
use tracing::{info, trace, warn};

use super::{Decision, DecisionListener, TxRole, TxSession, TxState, VOTE_COMMIT};
use crate::metrics;

/// Opens transactions, collects votes and broadcasts the global decision.
pub struct DistributedTxCoordinator<K: Connector> {
    connector: K,
    config: SessionConfig,
    listener: Arc<dyn DecisionListener>,
    session: Option<TxSession<K::Client>>,
    current_transaction: Option<String>,
    state: TxState,
    last_decision: Option<Decision>,
}

impl<K: Connector> std::fmt::Debug for DistributedTxCoordinator<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedTxCoordinator")
            .field("session", &self.session)
            .field("current_transaction", &self.current_transaction)
            .field("state", &self.state)
            .finish()
    }
}

impl<K: Connector> DistributedTxCoordinator<K> {
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
            current_transaction: None,
            state: TxState::Idle,
            last_decision: None,
        }
    }

    /// Create the persistent root `/<transaction_id>` with an empty payload.
    /// `participant_id` only labels the coordinator in logs.
    pub async fn start(
        &mut self,
        transaction_id: &str,
        participant_id: &str,
    ) -> CoordinationResult<()> {
        path::validate_segment(transaction_id)?;
        if let Some(open) = &self.current_transaction {
            return Err(CoordinationError::IllegalState(format!(
                "transaction {open} is still open"
            )));
        }
        let root = path::join(path::ROOT, transaction_id);
        let client = self.session().await?.client().clone();
        if let Err(err) = client.create_node(&root, CreateMode::Persistent, b"").await {
            warn!(?err, transaction = %root, "failed to open transaction");
            return Err(err);
        }

        info!(transaction = %root, coordinator = participant_id, "transaction opened");
        metrics::TX_STARTED
            .with_label_values(&[TxRole::Coordinator.as_str()])
            .inc();
        self.current_transaction = Some(root);
        self.state = TxState::Open;
        self.last_decision = None;
        Ok(())
    }

    /// Collect the votes. The first participant that did not vote commit
    /// aborts the transaction on the spot; the root is left in place so
    /// participants can read the decision. If every participant voted
    /// commit, commit is sent and the transaction is reset.
    ///
    /// Returns whether the transaction committed.
    pub async fn perform(&mut self) -> CoordinationResult<bool> {
        let (client, root) = self.open_transaction()?;
        let children = client.get_children(&root).await?;
        info!(transaction = %root, participants = children.len(), "collecting votes");

        for child in children {
            let node = path::join(&root, &child);
            let vote = client.get_data(&node, false).await?;
            if vote != VOTE_COMMIT.as_bytes() {
                info!(
                    participant = %node,
                    vote = %String::from_utf8_lossy(&vote),
                    "participant did not vote commit"
                );
                self.send_global_abort().await?;
                return Ok(false);
            }
        }

        self.send_global_commit().await?;
        self.reset().await?;
        Ok(true)
    }

    /// Write `global_commit` into the root and tell the listener. No-op
    /// without an open transaction.
    pub async fn send_global_commit(&mut self) -> CoordinationResult<()> {
        self.send_decision(Decision::Commit).await
    }

    /// Write `global_abort` into the root and tell the listener. No-op
    /// without an open transaction.
    pub async fn send_global_abort(&mut self) -> CoordinationResult<()> {
        self.send_decision(Decision::Abort).await
    }

    /// Delete the transaction root and everything under it, then forget the
    /// transaction. No-op without an open transaction.
    pub async fn reset(&mut self) -> CoordinationResult<()> {
        let Some(root) = self.current_transaction.clone() else {
            trace!("no open transaction to reset");
            return Ok(());
        };
        let client = self.client()?;
        if let Err(err) = client.force_delete(&root).await {
            warn!(?err, transaction = %root, "failed to remove transaction");
            return Err(err);
        }
        info!(transaction = %root, "transaction removed");
        self.current_transaction = None;
        self.state = TxState::Idle;
        Ok(())
    }

    /// Path of the open transaction root.
    pub fn current_transaction(&self) -> Option<&str> {
        self.current_transaction.as_deref()
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Decision sent for the most recent transaction, kept across `reset`.
    pub fn last_decision(&self) -> Option<Decision> {
        self.last_decision
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session.as_ref().map(TxSession::session_id)
    }

    /// End the session. An open transaction root is persistent and stays.
    pub async fn close(&mut self) -> CoordinationResult<()> {
        match self.session.take() {
            Some(session) => session.close().await,
            None => Ok(()),
        }
    }

    async fn send_decision(&mut self, decision: Decision) -> CoordinationResult<()> {
        let Some(root) = self.current_transaction.clone() else {
            trace!(%decision, "no open transaction, decision not sent");
            return Ok(());
        };
        let client = self.client()?;
        if let Err(err) = client.write(&root, decision.as_payload()).await {
            warn!(?err, transaction = %root, %decision, "failed to send decision");
            return Err(err);
        }

        info!(transaction = %root, %decision, "global decision sent");
        metrics::TX_DECISIONS
            .with_label_values(&[TxRole::Coordinator.as_str(), decision.label()])
            .inc();
        self.state = decision.into();
        self.last_decision = Some(decision);
        decision.notify(self.listener.as_ref());
        Ok(())
    }

    async fn session(&mut self) -> CoordinationResult<&TxSession<K::Client>> {
        if self.session.is_none() {
            let session = TxSession::open(
                TxRole::Coordinator,
                &self.connector,
                &self.config,
                |_| CoordinatorWatcher,
            )
            .await?;
            self.session = Some(session);
        }
        self.session
            .as_ref()
            .ok_or_else(|| CoordinationError::SessionClosed("coordinator session missing".into()))
    }

    fn client(&self) -> CoordinationResult<K::Client> {
        self.session
            .as_ref()
            .map(|session| session.client().clone())
            .ok_or_else(|| CoordinationError::SessionClosed("coordinator session closed".into()))
    }

    fn open_transaction(&self) -> CoordinationResult<(K::Client, String)> {
        let root = self
            .current_transaction
            .clone()
            .ok_or_else(|| CoordinationError::IllegalState("no open transaction".into()))?;
        Ok((self.client()?, root))
    }
}

/// The coordinator registers no watches.
struct CoordinatorWatcher;

#[async_trait]
impl Watcher for CoordinatorWatcher {
    async fn process(&self, event: WatchedEvent) {
        trace!(?event, "coordinator ignoring event");
    }
}
