#![allow(clippy::cognitive_complexity)]
use anyhow::{Result, anyhow, bail};

mod scenario;

use config::{
    SessionConfig,
    cli::{self, Command, Parser, VoteChoice},
    trace,
};
use coordination::{MemoryStore, memory::MEMORY_SCHEME};
use synchronization::Vote;
use tokio::runtime::Builder;
use tracing::*;
use uuid::Uuid;

fn main() -> Result<()> {
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let trace_config = trace::Config::parse(&config.recipes_log, config.log_format)?;
    debug!(?config, ?trace_config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config).await }).await {
            Err(err) => {
                error!(?err, "failed to run recipe");
                Err(anyhow!(err))
            }
            Ok(Err(err)) => {
                error!(?err, "exited with error");
                Err(err)
            }
            Ok(Ok(())) => {
                debug!("exiting...");
                Ok(())
            }
        }
    })
}

async fn start(config: cli::Config) -> Result<()> {
    let session = config.session_config()?;
    info!(connect_string = %session.connect_string, "using coordination store");
    let store = connector(&session)?;

    match config.command {
        Command::Lock {
            lock_name,
            contenders,
            hold_ms,
        } => {
            let report = scenario::lock::run(
                store,
                &session,
                &lock_name,
                contenders,
                std::time::Duration::from_millis(hold_ms),
            )
            .await?;
            info!(order = ?report.order, "lock granted in creation order, no overlapping holders");
        }
        Command::Tx {
            transaction_id,
            votes,
        } => {
            let transaction_id =
                transaction_id.unwrap_or_else(|| format!("tx-{}", Uuid::new_v4()));
            let votes: Vec<Vote> = votes.into_iter().map(vote).collect();
            let report = scenario::tx::run(store, &session, &transaction_id, &votes).await?;
            info!(
                transaction = %report.transaction,
                decision = %report.decision,
                participants = report.participants,
                "transaction decided"
            );
        }
    }
    Ok(())
}

/// Only the in-process store ships with the binary.
fn connector(session: &SessionConfig) -> Result<MemoryStore> {
    match session.scheme() {
        Some(MEMORY_SCHEME) => Ok(MemoryStore::new()),
        other => bail!(
            "no coordination store driver for '{}' (scheme {other:?})",
            session.connect_string
        ),
    }
}

fn vote(choice: VoteChoice) -> Vote {
    match choice {
        VoteChoice::Commit => Vote::Commit,
        VoteChoice::Abort => Vote::Abort,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connector_schemes() {
        assert!(connector(&SessionConfig::new("memory://local")).is_ok());
        let err = connector(&SessionConfig::new("zk://127.0.0.1:2181")).unwrap_err();
        assert!(err.to_string().contains("no coordination store driver"));
    }

    #[test]
    fn test_vote_mapping() {
        assert_eq!(vote(VoteChoice::Commit), Vote::Commit);
        assert_eq!(vote(VoteChoice::Abort), Vote::Abort);
    }
}
