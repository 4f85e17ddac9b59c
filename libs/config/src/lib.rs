//! Configuration for the coordination recipes.
//!
//! Every lock or transaction role is handed an explicit [`SessionConfig`] at
//! construction; there is no process-wide store URL.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use tracing::debug;

pub mod cli;
pub mod trace;
pub mod wire;

/// settings for one session against the coordination store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// where the store lives, e.g. `memory://local`
    pub connect_string: String,
    /// how long the store keeps the session alive without traffic
    pub session_timeout: Duration,
    /// how long a constructor waits for the "connected" event
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        wire::Session::default().into()
    }
}

impl From<wire::Session> for SessionConfig {
    fn from(session: wire::Session) -> Self {
        Self {
            connect_string: session.connect_string,
            session_timeout: session.session_timeout,
            connect_timeout: session.connect_timeout,
        }
    }
}

impl SessionConfig {
    pub fn new<S: Into<String>>(connect_string: S) -> Self {
        Self {
            connect_string: connect_string.into(),
            ..Self::default()
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_session_timeout(mut self, session_timeout: Duration) -> Self {
        self.session_timeout = session_timeout;
        self
    }

    /// the scheme part of the connect string (`memory` for `memory://local`)
    pub fn scheme(&self) -> Option<&str> {
        self.connect_string
            .split_once("://")
            .map(|(scheme, _)| scheme)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connect_string.trim().is_empty() {
            bail!("connect_string must not be empty");
        }
        if self.session_timeout.is_zero() {
            bail!("session_timeout must be greater than zero");
        }
        if self.connect_timeout.is_zero() {
            bail!("connect_timeout must be greater than zero");
        }
        Ok(())
    }
}

/// recipes config, as loaded from a file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecipesConfig {
    session: SessionConfig,
    path: Option<PathBuf>,
}

impl RecipesConfig {
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to find config at {}", &path.display()))?;
        let mut config = Self::parse_str(input)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// attempts to decode the config first as JSON, then YAML, finally erroring if neither work
    pub fn parse_str<S: AsRef<str>>(s: S) -> Result<Self> {
        let wire = match serde_json::from_str::<wire::Config>(s.as_ref()) {
            Ok(cfg) => cfg,
            Err(_err) => serde_yaml::from_str::<wire::Config>(s.as_ref())
                .context("config is neither valid JSON nor valid YAML")?,
        };
        debug!(?wire);

        let session = SessionConfig::from(wire.session);
        session.validate()?;
        Ok(Self {
            session,
            path: None,
        })
    }
}
