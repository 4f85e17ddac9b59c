//! Parse from either cli or env var

/// tokio worker thread name
pub static DEFAULT_THREAD_NAME: &str = "recipes-worker";
/// default log level. Can use this argument or RECIPES_LOG env var
pub const DEFAULT_RECIPES_LOG: &str = "info";
/// default lock name for the lock demo
pub const DEFAULT_LOCK_NAME: &str = "resource-A";
/// default number of lock contenders
pub const DEFAULT_CONTENDERS: usize = 3;
/// default time each contender holds the lock
pub const DEFAULT_HOLD_MS: u64 = 100;

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
pub use clap::Parser;
use clap::{Subcommand, ValueEnum};

use crate::{RecipesConfig, SessionConfig};

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[clap(author, name = "recipes", bin_name = "recipes", about, long_about = None)]
/// runs the lock and two-phase-commit recipes. `.env` in the working dir is loaded as well
pub struct Config {
    /// optional path to a JSON or YAML config file
    #[clap(short, long, value_parser, env)]
    pub config_path: Option<PathBuf>,
    /// coordination store connect string, overrides the config file
    #[clap(long, env, value_parser)]
    pub connect_string: Option<String>,
    /// session timeout in milliseconds, overrides the config file
    #[clap(long, env, value_parser)]
    pub session_timeout_ms: Option<u64>,
    /// how long to wait for a session to connect, in milliseconds
    #[clap(long, env, value_parser)]
    pub connect_timeout_ms: Option<u64>,
    /// number of tokio worker threads, defaults to the number of logical CPUs
    #[clap(long, env, value_parser)]
    pub threads: Option<usize>,
    /// Worker thread name
    #[clap(long, env, value_parser, default_value = DEFAULT_THREAD_NAME)]
    pub thread_name: String,
    /// set the log level. All valid RUST_LOG arguments are accepted
    #[clap(long, env, value_parser, default_value = DEFAULT_RECIPES_LOG)]
    pub recipes_log: String,
    /// log output format
    #[clap(long, env, value_enum, default_value_t = LogFormat::Standard)]
    pub log_format: LogFormat,
    #[clap(subcommand)]
    pub command: Command,
}

/// log as "json", "pretty" or "standard" (unstructured)
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Standard,
    Json,
    Pretty,
}

/// a participant's vote as given on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteChoice {
    Commit,
    Abort,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// contend for a single lock with several instances and check the acquisition order
    Lock {
        /// name of the lock root node
        #[clap(long, default_value = DEFAULT_LOCK_NAME)]
        lock_name: String,
        /// number of competing lock instances
        #[clap(long, default_value_t = DEFAULT_CONTENDERS)]
        contenders: usize,
        /// how long each holder keeps the lock, in milliseconds
        #[clap(long, default_value_t = DEFAULT_HOLD_MS)]
        hold_ms: u64,
    },
    /// run one two-phase-commit round with one participant per vote
    Tx {
        /// transaction id, a random one is generated if absent
        #[clap(long)]
        transaction_id: Option<String>,
        /// comma separated participant votes
        #[clap(
            long,
            value_enum,
            value_delimiter = ',',
            default_values_t = [VoteChoice::Commit, VoteChoice::Commit]
        )]
        votes: Vec<VoteChoice>,
    },
}

impl Config {
    /// Build the session config: file values first (or defaults), then any
    /// cli/env overrides on top
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut session = match &self.config_path {
            Some(path) => RecipesConfig::parse(path)?.session().clone(),
            None => SessionConfig::default(),
        };
        if let Some(connect_string) = &self.connect_string {
            session.connect_string = connect_string.clone();
        }
        if let Some(ms) = self.session_timeout_ms {
            session.session_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.connect_timeout_ms {
            session.connect_timeout = Duration::from_millis(ms);
        }
        session.validate()?;
        Ok(session)
    }
}
