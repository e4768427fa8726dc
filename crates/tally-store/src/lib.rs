//! Durable storage boundaries for Tally.
//!
//! The durable relational store owns posts and the final vote rows; the
//! engine only ever reaches it through [`DurableStore`]. Vote rows are written
//! by the batch committer, one transaction per batch, with last-write-wins by
//! submission time.
//!
//! The [`StatusStore`] is the short-lived acknowledgment cache the committer
//! consults to skip events it has already made durable.
//!
//! # Backends
//!
//! - [`InMemoryDurableStore`] -- staged-transaction store for tests and local
//!   runs, with switches for injecting commit failures
//! - [`InMemoryStatusStore`] -- TTL-bound acknowledgment flags

pub mod error;
pub mod memory;
pub mod model;
pub mod status;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryDurableStore;
pub use model::{PostFilter, PostRow, UpsertSummary, VoteRow};
pub use status::{InMemoryStatusStore, StatusRecord, StatusStore};
pub use traits::DurableStore;
