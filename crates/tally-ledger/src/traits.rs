use serde::{Deserialize, Serialize};
use tally_types::{CommunityId, OrderingKey, PostId, Timestamp, UserId, VoteDirection};

use crate::error::LedgerError;

/// What an accepted vote did to the ledger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteReceipt {
    pub post_id: PostId,
    pub user_id: UserId,
    pub previous: VoteDirection,
    pub direction: VoteDirection,
    pub delta: i64,
    /// Vote score after the delta was applied.
    pub score: i64,
    /// Stamp drawn while the transition held the ledger lock.
    pub submitted_at: Timestamp,
}

/// One row of a ranked read: a post and the value it was ordered by.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RankedEntry {
    pub post_id: PostId,
    pub rank: f64,
}

/// Everything the ledger knows about one post.
///
/// Used both to read a post out of the ledger and to rebuild it from durable
/// rows. `votes` holds every recorded direction, neutral ones included.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub post_id: PostId,
    pub community_id: CommunityId,
    pub author_id: UserId,
    pub created_at: Timestamp,
    pub votes: Vec<(UserId, VoteDirection)>,
}

/// Write boundary for vote ledger mutations.
pub trait LedgerWriter: Send + Sync {
    /// Register a post and seed its author's implicit upvote.
    fn create_post(
        &self,
        post: PostId,
        community: CommunityId,
        author: UserId,
        now: Timestamp,
    ) -> Result<(), LedgerError>;

    /// Apply a vote. `stamp` is called inside the same critical section as
    /// the transition, so stamps order the same way transitions do.
    fn submit_vote_stamped(
        &self,
        post: PostId,
        user: UserId,
        direction: VoteDirection,
        now: Timestamp,
        stamp: &dyn Fn() -> Timestamp,
    ) -> Result<VoteReceipt, LedgerError>;

    /// [`Self::submit_vote_stamped`] stamped with `now`.
    fn submit_vote(
        &self,
        post: PostId,
        user: UserId,
        direction: VoteDirection,
        now: Timestamp,
    ) -> Result<VoteReceipt, LedgerError> {
        self.submit_vote_stamped(post, user, direction, now, &|| now)
    }

    /// Rebuild a post from a durable snapshot. Window checks do not apply.
    fn restore_post(&self, snapshot: &PostSnapshot) -> Result<(), LedgerError>;
}

/// Read boundary for vote ledger queries.
///
/// Unknown posts read as empty or zero rather than failing.
pub trait LedgerReader: Send + Sync {
    /// Number of users currently voting `Up` on the post.
    fn vote_count_for(&self, post: PostId) -> Result<i64, LedgerError>;

    fn vote_counts_for(&self, posts: &[PostId]) -> Result<Vec<i64>, LedgerError> {
        posts.iter().map(|p| self.vote_count_for(*p)).collect()
    }

    /// `VOTE_WEIGHT` times the sum of recorded directions.
    fn score(&self, post: PostId) -> Result<i64, LedgerError>;

    fn direction_of(&self, post: PostId, user: UserId) -> Result<VoteDirection, LedgerError>;

    fn created_at(&self, post: PostId) -> Result<Option<Timestamp>, LedgerError>;

    fn community_of(&self, post: PostId) -> Result<Option<CommunityId>, LedgerError>;

    fn community_posts(&self, community: CommunityId) -> Result<Vec<PostId>, LedgerError>;

    /// One page of the global ordering, highest first.
    fn list_ordered(
        &self,
        ordering: OrderingKey,
        page: u64,
        size: u64,
    ) -> Result<Vec<PostId>, LedgerError>;

    /// The community's posts ranked by the chosen global ordering, highest
    /// first. Scores are aggregated with the membership weight using max.
    fn community_ranking(
        &self,
        community: CommunityId,
        ordering: OrderingKey,
    ) -> Result<Vec<RankedEntry>, LedgerError>;

    fn post_count(&self) -> Result<usize, LedgerError>;

    fn post_ids(&self) -> Result<Vec<PostId>, LedgerError>;

    fn snapshot(&self, post: PostId) -> Result<Option<PostSnapshot>, LedgerError>;
}

/// The full ledger surface the engine depends on.
pub trait VoteLedger: LedgerWriter + LedgerReader {}

impl<T: LedgerWriter + LedgerReader> VoteLedger for T {}

/// Offset of the first item on a 1-based page.
pub fn page_offset(page: u64, size: u64) -> Result<usize, LedgerError> {
    if page == 0 || size == 0 {
        return Err(LedgerError::InvalidPage { page, size });
    }
    let offset = (page - 1)
        .checked_mul(size)
        .ok_or(LedgerError::InvalidPage { page, size })?;
    usize::try_from(offset).map_err(|_| LedgerError::InvalidPage { page, size })
}
