//! # synchronization
//!
//! Distributed synchronization recipes built on the [`coordination`] client
//! contract.
//!
//! - **[`DistributedLock`]**: a fair, crash-safe mutex. Contenders are served
//!   in the order their candidate nodes were created.
//! - **[`tx`]**: two-phase commit. A [`DistributedTxCoordinator`] opens a
//!   transaction and decides it from the votes of any number of
//!   [`DistributedTxParticipant`]s, which learn the outcome through a
//!   [`DecisionListener`].
//!
//! Every recipe instance owns its own store session, so crashing or dropping
//! an instance releases whatever ephemeral state it held.

pub mod lock;
pub mod metrics;
mod session;
pub mod tx;

pub use lock::{DistributedLock, LOCK_PROCESS_PREFIX};
pub use tx::{
    Decision, DecisionListener, DistributedTxCoordinator, DistributedTxParticipant, TxRole,
    TxSession, TxState, Vote,
};
