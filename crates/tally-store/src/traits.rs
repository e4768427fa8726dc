use async_trait::async_trait;
use tally_types::{PostId, UserId};

use crate::error::StoreResult;
use crate::model::{PostFilter, PostRow, UpsertSummary, VoteRow};

/// The durable relational store holding posts and final vote rows.
///
/// Implementations must satisfy:
/// - `upsert_votes` is one transaction: either every row in the batch is
///   considered, or on error none of them is visible.
/// - Within a transaction a vote row only replaces a stored row whose
///   `submitted_at` is not newer.
/// - Reads never observe a partially applied batch.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert a new post row. Fails with `DuplicatePost` if the id exists.
    async fn insert_post(&self, post: &PostRow) -> StoreResult<()>;

    /// Upsert a batch of vote rows in a single transaction.
    async fn upsert_votes(&self, votes: &[VoteRow]) -> StoreResult<UpsertSummary>;

    /// Fetch posts by id. Unknown ids are skipped.
    ///
    /// With `order_preserving` the result follows the order of `ids`;
    /// otherwise it is in ascending id order.
    async fn query_posts_by_ids(
        &self,
        ids: &[PostId],
        order_preserving: bool,
    ) -> StoreResult<Vec<PostRow>>;

    /// Number of posts matching the filter.
    async fn count_by_filter(&self, filter: &PostFilter) -> StoreResult<u64>;

    /// One page of matching post ids, newest first.
    async fn search_post_ids(
        &self,
        filter: &PostFilter,
        page: u64,
        size: u64,
    ) -> StoreResult<Vec<PostId>>;

    async fn vote_row(&self, post: PostId, user: UserId) -> StoreResult<Option<VoteRow>>;

    /// All vote rows of one post, ordered by user id.
    async fn votes_for_post(&self, post: PostId) -> StoreResult<Vec<VoteRow>>;

    /// Posts with id greater than `after`, ascending, at most `limit` of them.
    async fn scan_posts(&self, after: Option<PostId>, limit: usize) -> StoreResult<Vec<PostRow>>;
}
