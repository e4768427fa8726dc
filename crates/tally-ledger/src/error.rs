use tally_types::{PostId, Timestamp, UserId, VoteDirection};

/// Errors produced by ledger operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("voting on post {post} closed: created {created}, now {now}")]
    VoteWindowExpired {
        post: PostId,
        created: Timestamp,
        now: Timestamp,
    },

    #[error("user {user} already voted {direction} on post {post}")]
    DuplicateVote {
        post: PostId,
        user: UserId,
        direction: VoteDirection,
    },

    #[error("post {0} already exists in the ledger")]
    PostExists(PostId),

    #[error("invalid page request: page={page}, size={size}")]
    InvalidPage { page: u64, size: u64 },

    #[error("ledger lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    /// Rejections are terminal: the caller asked for something the rules
    /// forbid, and retrying cannot change the answer.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::VoteWindowExpired { .. } | Self::DuplicateVote { .. }
        )
    }
}
