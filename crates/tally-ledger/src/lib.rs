//! Vote ledger for Tally.
//!
//! The ledger is the low-latency source of truth for "who voted what on which
//! post". This crate provides:
//! - The scoring model: pure vote transitions with a constant-weight delta
//! - `SortedSet`, an ordered-map-with-range-query standing in for a sorted-set
//!   store
//! - The `VoteLedger` trait boundary and `InMemoryVoteLedger`, which keeps
//!   VoteRecords, the Score Index, the Time Index and community membership
//!   behind one lock so every vote applies as a single atomic unit
//! - Consistency validation of score against recorded directions
//! - Warm-up of ledger state from durable snapshots

pub mod error;
pub mod memory;
pub mod scoring;
pub mod sorted;
pub mod traits;
pub mod validation;

pub use error::LedgerError;
pub use memory::{InMemoryVoteLedger, MEMBERSHIP_WEIGHT};
pub use scoring::{
    apply_vote, hot_rank, is_within_window, ScoreTransition, VoteOutcome, VOTE_WEIGHT, VOTE_WINDOW,
};
pub use sorted::{rank_descending, Aggregate, SortedSet};
pub use traits::{
    page_offset, LedgerReader, LedgerWriter, PostSnapshot, RankedEntry, VoteLedger, VoteReceipt,
};
pub use validation::{ConsistencyReport, ConsistencyValidator, Violation, ViolationKind};
