use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use config::SessionConfig;
use coordination::{Connector, CoordinationClient, path};
use synchronization::{
    Decision, DecisionListener, DistributedTxCoordinator, DistributedTxParticipant, Vote,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Outcome of a transaction run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReport {
    pub transaction: String,
    pub decision: Decision,
    pub participants: usize,
}

/// Hands decisions to the run over a channel.
struct Notify {
    who: String,
    tx: mpsc::UnboundedSender<Decision>,
}

impl DecisionListener for Notify {
    fn on_global_commit(&self) {
        debug!(who = %self.who, "observed global commit");
        let _ = self.tx.send(Decision::Commit);
    }

    fn on_global_abort(&self) {
        debug!(who = %self.who, "observed global abort");
        let _ = self.tx.send(Decision::Abort);
    }
}

fn notify(who: impl Into<String>) -> (Arc<Notify>, mpsc::UnboundedReceiver<Decision>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Arc::new(Notify {
            who: who.into(),
            tx,
        }),
        rx,
    )
}

/// One coordinator and one participant per entry of `votes`. The
/// participants vote, the coordinator performs, and the run checks the
/// decision: on abort every participant must have observed it, on commit the
/// transaction root must be gone.
pub async fn run<K>(
    connector: K,
    session: &SessionConfig,
    transaction_id: &str,
    votes: &[Vote],
) -> Result<TxReport>
where
    K: Connector + Clone,
{
    let (listener, mut coordinator_rx) = notify("coordinator");
    let mut coordinator =
        DistributedTxCoordinator::new(connector.clone(), session.clone(), listener);
    coordinator
        .start(transaction_id, "coordinator")
        .await
        .with_context(|| format!("failed to open transaction {transaction_id}"))?;

    let mut participants = Vec::with_capacity(votes.len());
    for (idx, vote) in votes.iter().enumerate() {
        let id = format!("p{}", idx + 1);
        let (listener, rx) = notify(id.clone());
        let mut participant =
            DistributedTxParticipant::new(connector.clone(), session.clone(), listener);
        participant
            .start(transaction_id, &id)
            .await
            .with_context(|| format!("participant {id} failed to join"))?;
        let voted = match vote {
            Vote::Commit => participant.vote_commit().await,
            Vote::Abort => participant.vote_abort().await,
        };
        voted.with_context(|| format!("participant {id} failed to vote"))?;
        info!(participant = %id, %vote, "participant voted");
        participants.push((id, participant, rx));
    }

    let expected = if votes.iter().all(|vote| *vote == Vote::Commit) {
        Decision::Commit
    } else {
        Decision::Abort
    };
    let committed = coordinator.perform().await.context("failed to perform")?;
    let decision = if committed {
        Decision::Commit
    } else {
        Decision::Abort
    };
    ensure!(
        decision == expected,
        "coordinator decided {decision} for votes {votes:?}"
    );
    let wait = session.session_timeout;
    match tokio::time::timeout(wait, coordinator_rx.recv()).await {
        Ok(Some(seen)) if seen == decision => {}
        other => bail!("coordinator listener did not report {decision}: {other:?}"),
    }

    let root = path::join(path::ROOT, transaction_id);
    match decision {
        Decision::Abort => {
            for (id, _, rx) in participants.iter_mut() {
                match tokio::time::timeout(wait, rx.recv()).await {
                    Ok(Some(Decision::Abort)) => debug!(participant = %id, "abort observed"),
                    other => bail!("participant {id} did not observe the abort: {other:?}"),
                }
            }
            coordinator.reset().await.context("failed to remove transaction")?;
        }
        Decision::Commit => {
            let (probe, _events) = connector
                .connect(session)
                .await
                .context("failed to open probe session")?;
            let leftover = probe.exists(&root).await?;
            probe.close().await?;
            ensure!(!leftover, "transaction root {root} still exists after commit");
        }
    }

    Ok(TxReport {
        transaction: root,
        decision,
        participants: participants.len(),
    })
}

#[cfg(test)]
mod tests {
    use coordination::MemoryStore;
    use tracing_test::traced_test;

    use super::*;

    fn session() -> SessionConfig {
        SessionConfig::new("memory://local")
    }

    #[tokio::test]
    #[traced_test]
    async fn test_commit_run() {
        let store = MemoryStore::new();
        let report = run(store.clone(), &session(), "tx-1", &[Vote::Commit, Vote::Commit])
            .await
            .unwrap();

        assert_eq!(report.decision, Decision::Commit);
        assert_eq!(report.transaction, "/tx-1");
        assert_eq!(report.participants, 2);
        assert!(store.peek("/tx-1").is_none());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_abort_run() {
        let store = MemoryStore::new();
        let report = run(
            store.clone(),
            &session(),
            "tx-1",
            &[Vote::Commit, Vote::Abort, Vote::Commit],
        )
        .await
        .unwrap();

        assert_eq!(report.decision, Decision::Abort);
        assert_eq!(report.participants, 3);
        assert!(store.peek("/tx-1").is_none());
        assert!(logs_contain("abort observed"));
    }

    #[tokio::test]
    async fn test_existing_transaction() {
        let store = MemoryStore::new();
        let (client, _events) = store.connect(&session()).await.unwrap();
        client
            .create_node("/tx-1", coordination::CreateMode::Persistent, b"")
            .await
            .unwrap();

        let err = run(store, &session(), "tx-1", &[Vote::Commit])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to open transaction tx-1"));
    }
}
