use std::fmt;

use tally_cache::CacheError;
use tally_commit::CommitError;
use tally_intake::IntakeError;
use tally_ledger::LedgerError;
use tally_store::StoreError;
use tally_types::PostId;

/// Why a vote was refused. Both are final: resubmitting cannot succeed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    VoteWindowExpired,
    DuplicateVote,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VoteWindowExpired => f.write_str("voting window closed"),
            Self::DuplicateVote => f.write_str("vote already recorded"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("vote rejected: {0}")]
    Rejected(RejectReason),

    /// The vote is recorded but could not be queued for persistence. Retry.
    #[error("intake unavailable: {0}")]
    IntakeUnavailable(#[source] IntakeError),

    #[error("post {0} already exists")]
    PostExists(PostId),

    #[error("invalid page request: page={page}, size={size}")]
    InvalidPage { page: u64, size: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("ledger error: {0}")]
    Ledger(LedgerError),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("cache error: {0}")]
    Cache(CacheError),

    #[error("intake error: {0}")]
    Intake(IntakeError),

    #[error("commit error: {0}")]
    Commit(#[from] CommitError),

    #[error("id generator error: {0}")]
    IdGenerator(String),
}

impl EngineError {
    /// Whether the caller should try the same request again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::IntakeUnavailable(_) => true,
            Self::Store(e) => e.is_transient(),
            Self::Commit(CommitError::DurableWriteFailure { .. }) => true,
            _ => false,
        }
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            Self::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl From<LedgerError> for EngineError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::VoteWindowExpired { .. } => Self::Rejected(RejectReason::VoteWindowExpired),
            LedgerError::DuplicateVote { .. } => Self::Rejected(RejectReason::DuplicateVote),
            LedgerError::PostExists(post) => Self::PostExists(post),
            LedgerError::InvalidPage { page, size } => Self::InvalidPage { page, size },
            other => Self::Ledger(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicatePost(post) => Self::PostExists(post),
            StoreError::InvalidPage { page, size } => Self::InvalidPage { page, size },
            other => Self::Store(other),
        }
    }
}

impl From<CacheError> for EngineError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::Ledger(inner) => inner.into(),
        }
    }
}

impl From<IntakeError> for EngineError {
    fn from(e: IntakeError) -> Self {
        if e.is_unavailable() {
            Self::IntakeUnavailable(e)
        } else {
            Self::Intake(e)
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
