use std::sync::Arc;
use std::time::Duration;

use config::SessionConfig;
use coordination::MemoryStore;
use synchronization::{
    Decision, DecisionListener, DistributedTxCoordinator, DistributedTxParticipant, TxState,
};
use tokio::sync::mpsc;
use tracing_test::traced_test;

/// Forwards every decision to a channel so tests can await it.
struct Forward(mpsc::UnboundedSender<Decision>);

impl DecisionListener for Forward {
    fn on_global_commit(&self) {
        let _ = self.0.send(Decision::Commit);
    }
    fn on_global_abort(&self) {
        let _ = self.0.send(Decision::Abort);
    }
}

fn listener() -> (Arc<Forward>, mpsc::UnboundedReceiver<Decision>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(Forward(tx)), rx)
}

fn config() -> SessionConfig {
    SessionConfig::new("memory://local")
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Decision>) -> Decision {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no decision within 5s")
        .expect("listener dropped")
}

struct Participant {
    inner: DistributedTxParticipant<MemoryStore>,
    decisions: mpsc::UnboundedReceiver<Decision>,
}

async fn join(store: &MemoryStore, tx: &str, id: &str) -> Participant {
    let (listener, decisions) = listener();
    let mut inner = DistributedTxParticipant::new(store.clone(), config(), listener);
    inner.start(tx, id).await.unwrap();
    Participant { inner, decisions }
}

#[tokio::test]
#[traced_test]
/// p1 and p2 vote commit, everyone observes global_commit
async fn test_all_commit() {
    let store = MemoryStore::new();
    let (listener, mut decisions) = listener();
    let mut coordinator = DistributedTxCoordinator::new(store.clone(), config(), listener);
    coordinator.start("tx-1", "coord").await.unwrap();

    let mut p1 = join(&store, "tx-1", "p1").await;
    let mut p2 = join(&store, "tx-1", "p2").await;
    p1.inner.vote_commit().await.unwrap();
    p2.inner.vote_commit().await.unwrap();

    // decide and broadcast, then clean up once everyone has seen it
    coordinator.send_global_commit().await.unwrap();
    assert_eq!(next(&mut decisions).await, Decision::Commit);
    assert_eq!(next(&mut p1.decisions).await, Decision::Commit);
    assert_eq!(next(&mut p2.decisions).await, Decision::Commit);
    assert_eq!(coordinator.state(), TxState::Committed);

    coordinator.reset().await.unwrap();
    assert!(store.peek("/tx-1").is_none());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!p1.inner.is_open());
    assert!(!p2.inner.is_open());
    // nothing further was delivered
    assert!(p1.decisions.try_recv().is_err());
    assert!(p2.decisions.try_recv().is_err());
}

#[tokio::test]
/// perform on unanimous commit votes commits and removes the transaction
async fn test_perform_commits() {
    let store = MemoryStore::new();
    let (listener, mut decisions) = listener();
    let mut coordinator = DistributedTxCoordinator::new(store.clone(), config(), listener);
    coordinator.start("tx-1", "coord").await.unwrap();
    let mut p1 = join(&store, "tx-1", "p1").await;
    let p2 = join(&store, "tx-1", "p2").await;
    p1.inner.vote_commit().await.unwrap();
    p2.inner.vote_commit().await.unwrap();

    assert!(coordinator.perform().await.unwrap());
    assert_eq!(next(&mut decisions).await, Decision::Commit);
    assert!(store.peek("/tx-1").is_none());
    assert_eq!(coordinator.current_transaction(), None);

    // participants leave the finished transaction and can join the next one
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!p1.inner.is_open());
    assert!(!p2.inner.is_open());
    coordinator.start("tx-2", "coord").await.unwrap();
    p1.inner.start("tx-2", "p1").await.unwrap();
    assert!(p1.inner.is_open());
}

#[tokio::test]
#[traced_test]
/// p2 votes abort, everyone observes global_abort
async fn test_abort_vote() {
    let store = MemoryStore::new();
    let (listener, mut decisions) = listener();
    let mut coordinator = DistributedTxCoordinator::new(store.clone(), config(), listener);
    coordinator.start("tx-1", "coord").await.unwrap();

    let mut p1 = join(&store, "tx-1", "p1").await;
    let mut p2 = join(&store, "tx-1", "p2").await;
    p1.inner.vote_commit().await.unwrap();
    p2.inner.vote_abort().await.unwrap();

    assert!(!coordinator.perform().await.unwrap());
    assert_eq!(next(&mut decisions).await, Decision::Abort);
    assert_eq!(next(&mut p1.decisions).await, Decision::Abort);
    assert_eq!(next(&mut p2.decisions).await, Decision::Abort);

    // abort leaves the root for stragglers
    assert_eq!(store.peek("/tx-1").unwrap(), b"global_abort");
    assert_eq!(coordinator.state(), TxState::Aborted);
    coordinator.reset().await.unwrap();
    assert!(store.peek("/tx-1").is_none());
}

#[tokio::test]
/// participants that never voted make perform abort
async fn test_missing_vote_aborts() {
    let store = MemoryStore::new();
    let (listener, _decisions) = listener();
    let mut coordinator = DistributedTxCoordinator::new(store.clone(), config(), listener);
    coordinator.start("tx-1", "coord").await.unwrap();
    let mut p1 = join(&store, "tx-1", "p1").await;

    assert!(!coordinator.perform().await.unwrap());
    assert_eq!(next(&mut p1.decisions).await, Decision::Abort);
}

#[tokio::test]
/// a participant that crashes before voting simply disappears from the vote
async fn test_crashed_participant_leaves() {
    let store = MemoryStore::new();
    let (listener, _decisions) = listener();
    let mut coordinator = DistributedTxCoordinator::new(store.clone(), config(), listener);
    coordinator.start("tx-1", "coord").await.unwrap();
    let p1 = join(&store, "tx-1", "p1").await;
    let mut crashed = join(&store, "tx-1", "p2").await;
    p1.inner.vote_commit().await.unwrap();

    crashed.inner.close().await.unwrap();
    assert_eq!(store.peek_children("/tx-1").unwrap(), ["txp_p1"]);
    assert!(coordinator.perform().await.unwrap());
}

#[tokio::test]
/// joining a transaction nobody started fails and leaves nothing behind
async fn test_join_unknown_transaction() {
    let store = MemoryStore::new();
    let (listener, _decisions) = listener();
    let mut participant = DistributedTxParticipant::new(store.clone(), config(), listener);

    let err = participant.start("tx-404", "p1").await.unwrap_err();
    assert!(err.is_no_node());
    assert!(!participant.is_open());
    assert_eq!(store.node_count(), 0);
}

#[tokio::test]
/// sequential transactions reuse the same coordinator and participant
async fn test_back_to_back_transactions() {
    let store = MemoryStore::new();
    let (listener, mut decisions) = listener();
    let mut coordinator = DistributedTxCoordinator::new(store.clone(), config(), listener);
    let (p_listener, mut p_decisions) = self::listener();
    let mut participant = DistributedTxParticipant::new(store.clone(), config(), p_listener);

    for (tx, vote_commit) in [("tx-1", false), ("tx-2", true)] {
        coordinator.start(tx, "coord").await.unwrap();
        participant.start(tx, "p1").await.unwrap();
        if vote_commit {
            participant.vote_commit().await.unwrap();
        } else {
            participant.vote_abort().await.unwrap();
        }
        let committed = coordinator.perform().await.unwrap();
        assert_eq!(committed, vote_commit);
        if !committed {
            assert_eq!(next(&mut p_decisions).await, Decision::Abort);
            coordinator.reset().await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!participant.is_open());
    }
    assert_eq!(next(&mut decisions).await, Decision::Abort);
    assert_eq!(next(&mut decisions).await, Decision::Commit);
    assert_eq!(store.node_count(), 0);
    assert!(coordinator.session_id().is_some());
}
