//! The client contract every recipe is written against.
//!
//! [`Connector`] establishes sessions, [`CoordinationClient`] is the handle for
//! one live session. Implementations must provide the store guarantees the
//! recipes rely on: atomic creates, strictly increasing sequential suffixes per
//! parent, ephemeral nodes bound to their session, and one-shot watches.

use async_trait::async_trait;
use config::SessionConfig;

use crate::error::CoordinationResult;
use crate::event::WatchEvents;

/// Width of the zero-padded counter appended to sequential nodes.
pub const SEQUENCE_WIDTH: usize = 10;

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateMode {
    /// Lives until deleted.
    Persistent,
    /// Persistent, with a store-assigned counter appended to the name.
    PersistentSequential,
    /// Removed automatically when the creating session ends.
    Ephemeral,
    /// Ephemeral, with a store-assigned counter appended to the name.
    EphemeralSequential,
}

impl CreateMode {
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    pub fn is_sequential(&self) -> bool {
        matches!(
            self,
            CreateMode::PersistentSequential | CreateMode::EphemeralSequential
        )
    }
}

/// Format the name a sequential create produces for `prefix` and `seq`.
pub fn sequential_name(prefix: &str, seq: u64) -> String {
    format!("{prefix}{seq:0width$}", width = SEQUENCE_WIDTH)
}

/// Operations on one session. Clones share the session.
#[async_trait]
pub trait CoordinationClient: Clone + Send + Sync + std::fmt::Debug + 'static {
    /// Id of the session this handle belongs to.
    fn session_id(&self) -> u64;

    /// Create `path` and return the path actually created (sequential modes
    /// append a counter). Fails with `NodeExists` if a non-sequential path is
    /// taken and `NoNode` if the parent is missing.
    async fn create_node(
        &self,
        path: &str,
        mode: CreateMode,
        data: &[u8],
    ) -> CoordinationResult<String>;

    /// Non-watching existence check.
    async fn exists(&self, path: &str) -> CoordinationResult<bool>;

    /// Register a one-shot watch on `path` that fires on its next
    /// creation, deletion or data change. Returns whether the node existed at
    /// registration time.
    async fn add_watch(&self, path: &str) -> CoordinationResult<bool>;

    /// Drop this session's pending watch on `path`, if any.
    async fn remove_watch(&self, path: &str) -> CoordinationResult<()>;

    /// Read the payload of `path`, optionally leaving a one-shot watch that
    /// fires on the next data change or deletion.
    async fn get_data(&self, path: &str, watch: bool) -> CoordinationResult<Vec<u8>>;

    /// Unconditionally overwrite the payload of `path`.
    async fn write(&self, path: &str, data: &[u8]) -> CoordinationResult<()>;

    /// Delete a childless node. `NoNode` if absent, `NotEmpty` with children.
    async fn delete(&self, path: &str) -> CoordinationResult<()>;

    /// Delete `path` and its whole subtree. A missing path is not an error.
    async fn force_delete(&self, path: &str) -> CoordinationResult<()>;

    /// Names (not paths) of the immediate children of `root`, unordered.
    async fn get_children(&self, root: &str) -> CoordinationResult<Vec<String>>;

    /// End the session. Its ephemeral nodes are removed and its pending
    /// watches dropped. Closing twice is a no-op.
    async fn close(&self) -> CoordinationResult<()>;
}

/// Establishes sessions against a store.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug + 'static {
    type Client: CoordinationClient;

    /// Open a session. The returned channel yields a `SyncConnected` event
    /// once the session is live, followed by fired watches.
    async fn connect(
        &self,
        config: &SessionConfig,
    ) -> CoordinationResult<(Self::Client, WatchEvents)>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mode_flags() {
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(!CreateMode::Persistent.is_sequential());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(CreateMode::Ephemeral.is_ephemeral());
        assert!(!CreateMode::Ephemeral.is_sequential());
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
    }

    #[test]
    fn test_sequential_name_sorts_numerically() {
        assert_eq!(sequential_name("lp_", 7), "lp_0000000007");
        let mut names = vec![
            sequential_name("lp_", 10),
            sequential_name("lp_", 9),
            sequential_name("lp_", 100),
        ];
        names.sort();
        assert_eq!(names, ["lp_0000000009", "lp_0000000010", "lp_0000000100"]);
    }
}
