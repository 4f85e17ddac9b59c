//! Error types for coordination store operations.
//!
//! Typed variants let the recipes tell apart the cases they react to
//! differently: a root node that already exists is fine, a missing node
//! during an acquire loop is not.

use thiserror::Error;

/// Top-level error type for the coordination crate.
#[derive(Debug, Error)]
pub enum CoordinationError {
    /// The session could not be established (store unreachable, bad connect
    /// string, or no "connected" event within the connect timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// A non-sequential create hit an existing path.
    #[error("node already exists: {0}")]
    NodeExists(String),

    /// The node (or the parent of a node being created) does not exist.
    #[error("no node: {0}")]
    NoNode(String),

    /// A plain delete was issued against a node that still has children.
    #[error("node not empty: {0}")]
    NotEmpty(String),

    /// Ephemeral nodes cannot have children.
    #[error("ephemeral nodes cannot have children: {0}")]
    NoChildrenForEphemerals(String),

    /// The path is not a valid absolute node path.
    #[error("bad path: {0}")]
    BadPath(String),

    /// The session was closed or expired; no further operations are possible.
    #[error("session closed: {0}")]
    SessionClosed(String),

    /// The caller used an API out of order (e.g. release without acquire).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A blocking wait ended without its wake-up signal being fired.
    #[error("wait interrupted: {0}")]
    InterruptedWait(String),
}

impl CoordinationError {
    /// Returns true if this error indicates a transient failure that may
    /// succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoordinationError::Connection(_))
    }

    /// Returns true if this error is a node-exists conflict.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, CoordinationError::NodeExists(_))
    }

    /// Returns true if the node was missing.
    pub fn is_no_node(&self) -> bool {
        matches!(self, CoordinationError::NoNode(_))
    }

    /// Returns true if the session could not be established.
    pub fn is_connection(&self) -> bool {
        matches!(self, CoordinationError::Connection(_))
    }
}

/// Shorthand result alias for coordination operations.
pub type CoordinationResult<T> = Result<T, CoordinationError>;
