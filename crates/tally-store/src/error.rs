use tally_types::PostId;

/// Errors from durable and status store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The backend cannot be reached.
    #[error("store unavailable")]
    Unavailable,

    /// The transaction was rolled back; none of its writes are visible.
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("post {0} already stored")]
    DuplicatePost(PostId),

    #[error("invalid page request: page={page}, size={size}")]
    InvalidPage { page: u64, size: u64 },

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    /// Whether the same request may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable | Self::TransactionAborted(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
