//! End-to-end runs of each recipe against a live store, with the
//! verification the binary reports on.

pub mod lock;
pub mod tx;
