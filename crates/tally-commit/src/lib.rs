//! Batch committer for Tally.
//!
//! Drains the intake queue in bounded batches, collapses each batch to the
//! latest event per `(post, user)`, and writes it to the durable store in a
//! single transaction. Acknowledgment flags in the status store let
//! redelivered events skip the store entirely.
//!
//! A failed transaction leaves nothing behind: the whole batch goes back on
//! the queue and the committer backs off. Voters never see these failures.

pub mod committer;
pub mod config;
pub mod error;

pub use committer::{BatchCommitter, BatchReport, CommitStats, CommitterHandle};
pub use config::CommitConfig;
pub use error::CommitError;
