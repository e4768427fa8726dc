//! Vote intake queue for Tally.
//!
//! Decouples vote acceptance from durable persistence:
//!
//! - [`IntakeQueue`] -- bounded, FIFO, at-least-once buffer of encoded
//!   [`VoteIntakeEvent`](tally_types::VoteIntakeEvent)s with explicit
//!   `poll` / `ack` / `nack` for the consumer
//! - [`WriteAheadLog`] -- optional outbox file; un-acked events survive a
//!   restart and are redelivered
//! - [`enqueue_with_retry`] -- producer-side bounded exponential backoff
//!
//! Events carry no ordering guarantee beyond enqueue order. Consumers must
//! treat redelivery as a no-op once an event is durable.

pub mod error;
pub mod queue;
pub mod retry;
pub mod wal;

pub use error::{IntakeError, Result};
pub use queue::{Delivery, IntakeQueue, QueueConfig};
pub use retry::{enqueue_with_retry, RetryPolicy};
pub use wal::{pending_from, read_records, SyncMode, WalRecord, WriteAheadLog};
