use serde::{Deserialize, Serialize};
use tally_types::{CommunityId, PostId, Timestamp, UserId, VoteDirection};

/// A row of the `post` table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRow {
    pub post_id: PostId,
    pub author_id: UserId,
    pub community_id: CommunityId,
    /// Publication status; `1` is published.
    pub status: i32,
    pub title: String,
    pub content: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PostRow {
    pub const PUBLISHED: i32 = 1;

    pub fn new(
        post_id: PostId,
        author_id: UserId,
        community_id: CommunityId,
        title: impl Into<String>,
        content: impl Into<String>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            post_id,
            author_id,
            community_id,
            status: Self::PUBLISHED,
            title: title.into(),
            content: content.into(),
            created_at,
            updated_at: created_at,
        }
    }
}

/// A row of the `vote` table, unique on `(post_id, user_id)`.
///
/// `submitted_at` is the submission time of the event that last wrote the
/// row; a write carrying an older time loses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRow {
    pub post_id: PostId,
    pub user_id: UserId,
    pub direction: VoteDirection,
    pub submitted_at: Timestamp,
}

/// Listing filter. Both parts are optional and combine with AND.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostFilter {
    pub community: Option<CommunityId>,
    /// Case-insensitive substring of title or content.
    pub search: Option<String>,
}

impl PostFilter {
    pub fn community(community: CommunityId) -> Self {
        Self {
            community: Some(community),
            search: None,
        }
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        let search = search.into();
        self.search = if search.trim().is_empty() {
            None
        } else {
            Some(search)
        };
        self
    }

    pub fn matches(&self, row: &PostRow) -> bool {
        if let Some(community) = self.community {
            if row.community_id != community {
                return false;
            }
        }
        match &self.search {
            Some(needle) => {
                let needle = needle.to_lowercase();
                row.title.to_lowercase().contains(&needle)
                    || row.content.to_lowercase().contains(&needle)
            }
            None => true,
        }
    }
}

/// Outcome of one `upsert_votes` transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    /// Rows inserted or overwritten.
    pub applied: usize,
    /// Rows skipped because the stored row is newer.
    pub stale: usize,
}
