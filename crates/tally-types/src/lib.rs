//! Foundation types for Tally, the vote ingestion and ranking engine.
//!
//! Every other Tally crate depends on `tally-types`.
//!
//! # Key Types
//!
//! - [`PostId`], [`UserId`], [`CommunityId`] — numeric identifiers
//! - [`VoteDirection`] — up / neutral / down, the value of a vote record
//! - [`Timestamp`] — millisecond wall-clock instant
//! - [`Clock`] — injectable time source ([`SystemClock`], [`ManualClock`])
//! - [`HybridClock`] — strictly increasing submission stamps
//! - [`OrderingKey`] — the two global orderings (time, score)
//! - [`VoteIntakeEvent`] — the immutable message carried by the intake queue

pub mod clock;
pub mod error;
pub mod event;
pub mod ids;
pub mod ordering;
pub mod temporal;
pub mod vote;

pub use clock::{Clock, HybridClock, ManualClock, SystemClock};
pub use error::TypeError;
pub use event::{IdempotencyKey, VoteIntakeEvent};
pub use ids::{CommunityId, PostId, UserId};
pub use ordering::OrderingKey;
pub use temporal::Timestamp;
pub use vote::VoteDirection;
