//! Lock and transaction metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!` and
//! registered with the default prometheus registry. Registration failures are
//! fatal (`.unwrap()`): a duplicate metric name is a programming error.

use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, register_histogram, register_int_counter,
    register_int_counter_vec,
};

lazy_static! {
    // --- lock ---

    /// Count of successful lock acquisitions (blocking or try)
    pub static ref LOCK_ACQUIRED: IntCounter = register_int_counter!(
        "lock_acquired",
        "count of distributed lock acquisitions"
    ).unwrap();

    /// Count of lock releases
    pub static ref LOCK_RELEASED: IntCounter = register_int_counter!(
        "lock_released",
        "count of distributed lock releases"
    ).unwrap();

    /// Count of watch waits performed while acquiring
    pub static ref LOCK_WAITS: IntCounter = register_int_counter!(
        "lock_waits",
        "count of times an acquire parked on a deletion watch"
    ).unwrap();

    /// Time from calling acquire to holding the lock
    pub static ref LOCK_WAIT_SECONDS: Histogram = register_histogram!(
        "lock_wait_seconds",
        "time spent waiting in acquire_lock"
    ).unwrap();

    // --- two-phase commit ---

    /// Transactions started, by role
    pub static ref TX_STARTED: IntCounterVec = register_int_counter_vec!(
        "tx_started",
        "count of transactions started",
        &["role"]
    ).unwrap();

    /// Decisions sent (coordinator) or observed (participant)
    pub static ref TX_DECISIONS: IntCounterVec = register_int_counter_vec!(
        "tx_decisions",
        "count of global decisions sent or received",
        &["role", "decision"]
    ).unwrap();

    /// Votes cast by participants
    pub static ref TX_VOTES: IntCounterVec = register_int_counter_vec!(
        "tx_votes",
        "count of participant votes cast",
        &["vote"]
    ).unwrap();
}
