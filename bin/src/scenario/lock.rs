use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, ensure};
use config::SessionConfig;
use coordination::Connector;
use rand::Rng;
use synchronization::DistributedLock;
use tracing::{debug, info};

/// Outcome of a lock run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockReport {
    /// contender names in the order they were granted the lock
    pub order: Vec<String>,
}

/// One contender's tenure.
#[derive(Debug)]
struct Hold {
    name: String,
    acquired: Instant,
    released: Instant,
    holder: Vec<u8>,
}

/// Register `contenders` locks on `lock_name`, let them all compete, and check
/// that they were served one at a time in registration order. Each holder
/// keeps the lock for `hold` plus up to half of that again.
pub async fn run<K>(
    connector: K,
    session: &SessionConfig,
    lock_name: &str,
    contenders: usize,
    hold: Duration,
) -> Result<LockReport>
where
    K: Connector,
{
    ensure!(contenders > 0, "at least one contender is needed");

    let mut locks = Vec::with_capacity(contenders);
    for id in 1..=contenders {
        let name = format!("C{id}");
        let lock = DistributedLock::new(&connector, session, lock_name, name.clone())
            .await
            .with_context(|| format!("contender {name} failed to register"))?;
        debug!(contender = %name, candidate = %lock.candidate_path(), "contender registered");
        locks.push((name, lock));
    }
    let created: Vec<String> = locks.iter().map(|(name, _)| name.clone()).collect();

    let max_jitter = hold.as_millis() as u64 / 2;
    let tasks = locks.into_iter().map(|(name, mut lock)| {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter));
        tokio::spawn(async move {
            lock.acquire_lock().await?;
            let acquired = Instant::now();
            let holder = lock.lock_holder_data().await?;
            info!(contender = %name, "holding lock");
            tokio::time::sleep(hold + jitter).await;
            let released = Instant::now();
            lock.release_lock().await?;
            lock.close().await?;
            Ok::<_, coordination::CoordinationError>(Hold {
                name,
                acquired,
                released,
                holder,
            })
        })
    });

    let mut holds = Vec::with_capacity(contenders);
    for joined in futures::future::join_all(tasks).await {
        let hold = joined
            .context("contender task failed")?
            .context("contender failed")?;
        holds.push(hold);
    }
    holds.sort_by_key(|hold| hold.acquired);

    for hold in &holds {
        ensure!(
            hold.holder == hold.name.as_bytes(),
            "{} held the lock while {} was reported as holder",
            hold.name,
            String::from_utf8_lossy(&hold.holder)
        );
    }
    for pair in holds.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.acquired < prev.released {
            return Err(anyhow!(
                "{} acquired the lock before {} released it",
                next.name,
                prev.name
            ));
        }
    }
    let order: Vec<String> = holds.into_iter().map(|hold| hold.name).collect();
    ensure!(
        order == created,
        "lock granted in order {order:?}, contenders registered in order {created:?}"
    );
    Ok(LockReport { order })
}

#[cfg(test)]
mod tests {
    use coordination::MemoryStore;
    use tracing_test::traced_test;

    use super::*;

    #[tokio::test]
    #[traced_test]
    async fn test_lock_run() {
        let store = MemoryStore::new();
        let report = run(
            store.clone(),
            &SessionConfig::new("memory://local"),
            "resource-A",
            3,
            Duration::from_millis(5),
        )
        .await
        .unwrap();

        assert_eq!(report.order, ["C1", "C2", "C3"]);
        assert_eq!(store.session_count(), 0);
        assert!(logs_contain("holding lock"));
    }

    #[tokio::test]
    async fn test_no_contenders() {
        let err = run(
            MemoryStore::new(),
            &SessionConfig::new("memory://local"),
            "resource-A",
            0,
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("at least one contender"));
    }

    #[tokio::test]
    async fn test_unreachable_store() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = run(
            store,
            &SessionConfig::new("memory://local"),
            "resource-A",
            2,
            Duration::from_millis(5),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("contender C1 failed to register"));
    }
}
