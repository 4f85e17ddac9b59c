//! # coordination
//!
//! Client-side contract for a hierarchical, strongly ordered coordination
//! store (atomic node creation, ephemeral and sequential nodes, one-shot
//! watches), plus an in-memory implementation of it.
//!
//! This library provides:
//! - **[`CoordinationClient`]** and **[`Connector`]**: the operations recipes
//!   are written against, and session establishment from a `SessionConfig`.
//! - **Events**: typed session/watch notifications, the [`Watcher`] callback
//!   trait, a per-session event loop and a single-use [`Signal`].
//! - **Errors**: a typed taxonomy so callers can tolerate `NodeExists` on a
//!   root create while propagating everything else.
//! - **[`MemoryStore`]**: a complete process-local store used by tests and the
//!   demo binary. Networked stores plug in behind the same `Connector`.

pub mod client;
pub mod error;
pub mod event;
pub mod memory;
pub mod path;

// Re-export key types for convenient access
pub use client::{Connector, CoordinationClient, CreateMode};
pub use error::{CoordinationError, CoordinationResult};
pub use event::{
    EventType, KeeperState, Signal, SignalWait, WatchEvents, WatchedEvent, Watcher,
    spawn_event_loop,
};
pub use memory::{MemorySession, MemoryStore};
