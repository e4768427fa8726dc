use std::io;

use tally_types::TypeError;

/// Errors produced by the intake queue.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    /// Buffer holds `capacity` un-acked events already.
    #[error("intake queue full ({capacity} events)")]
    Full { capacity: usize },

    #[error("intake queue closed")]
    Closed,

    /// Enqueue did not succeed within the retry budget.
    #[error("enqueue abandoned after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("enqueue timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("event encoding failed: {0}")]
    Encode(#[from] TypeError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("intake lock poisoned")]
    LockPoisoned,
}

impl IntakeError {
    /// The queue cannot take the event right now; the vote itself is fine.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Full { .. }
                | Self::Closed
                | Self::RetriesExhausted { .. }
                | Self::Timeout(_)
                | Self::Io(_)
                | Self::LockPoisoned
        )
    }

    /// Worth another enqueue attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Full { .. } | Self::Io(_))
    }
}

/// Convenience alias used throughout the intake crate.
pub type Result<T> = std::result::Result<T, IntakeError>;
