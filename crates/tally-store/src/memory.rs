use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tally_types::{PostId, UserId};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::model::{PostFilter, PostRow, UpsertSummary, VoteRow};
use crate::traits::DurableStore;

/// In-memory durable store.
///
/// `upsert_votes` stages every row against a private copy of the affected
/// rows and swaps them in only when the whole batch succeeds. Failure
/// switches let tests abort commits on demand.
pub struct InMemoryDurableStore {
    tables: RwLock<Tables>,
    available: AtomicBool,
    fail_commits: AtomicU32,
    failing_posts: RwLock<HashSet<PostId>>,
    commits: AtomicU64,
}

#[derive(Default)]
struct Tables {
    posts: BTreeMap<PostId, PostRow>,
    votes: HashMap<(PostId, UserId), VoteRow>,
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            available: AtomicBool::new(true),
            fail_commits: AtomicU32::new(0),
            failing_posts: RwLock::new(HashSet::new()),
            commits: AtomicU64::new(0),
        }
    }

    /// Make every operation fail with `Unavailable` until switched back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Abort the next `n` vote transactions after staging.
    pub fn fail_next_commits(&self, n: u32) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Abort any vote transaction that touches `post`.
    pub fn fail_on_post(&self, post: PostId) -> StoreResult<()> {
        self.failing_posts
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(post);
        Ok(())
    }

    pub fn clear_failures(&self) -> StoreResult<()> {
        self.fail_commits.store(0, Ordering::SeqCst);
        self.failing_posts
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        Ok(())
    }

    /// Number of vote transactions committed so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn vote_row_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.votes.len())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Tables>> {
        self.check_available()?;
        self.tables.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Tables>> {
        self.check_available()?;
        self.tables.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn take_commit_failure(&self) -> bool {
        self.fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Matching posts, newest first, ties by id descending.
    fn filtered(tables: &Tables, filter: &PostFilter) -> Vec<PostId> {
        let mut rows: Vec<&PostRow> = tables
            .posts
            .values()
            .filter(|row| filter.matches(row))
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.post_id.cmp(&a.post_id))
        });
        rows.into_iter().map(|row| row.post_id).collect()
    }
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn insert_post(&self, post: &PostRow) -> StoreResult<()> {
        let mut tables = self.write()?;
        if tables.posts.contains_key(&post.post_id) {
            return Err(StoreError::DuplicatePost(post.post_id));
        }
        tables.posts.insert(post.post_id, post.clone());
        Ok(())
    }

    async fn upsert_votes(&self, votes: &[VoteRow]) -> StoreResult<UpsertSummary> {
        let mut tables = self.write()?;
        let failing = self
            .failing_posts
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .clone();

        let mut staged: HashMap<(PostId, UserId), VoteRow> = HashMap::new();
        let mut summary = UpsertSummary::default();

        for row in votes {
            if failing.contains(&row.post_id) {
                warn!(post_id = %row.post_id, "vote transaction rolled back");
                return Err(StoreError::TransactionAborted(format!(
                    "write to post {} rejected",
                    row.post_id
                )));
            }

            let key = (row.post_id, row.user_id);
            let current = staged.get(&key).or_else(|| tables.votes.get(&key));
            match current {
                Some(existing) if existing.submitted_at > row.submitted_at => summary.stale += 1,
                _ => {
                    staged.insert(key, *row);
                    summary.applied += 1;
                }
            }
        }

        if self.take_commit_failure() {
            warn!(rows = votes.len(), "vote transaction rolled back");
            return Err(StoreError::TransactionAborted("commit failed".into()));
        }

        tables.votes.extend(staged);
        self.commits.fetch_add(1, Ordering::SeqCst);
        debug!(
            applied = summary.applied,
            stale = summary.stale,
            "vote transaction committed"
        );
        Ok(summary)
    }

    async fn query_posts_by_ids(
        &self,
        ids: &[PostId],
        order_preserving: bool,
    ) -> StoreResult<Vec<PostRow>> {
        let tables = self.read()?;
        let mut rows: Vec<PostRow> = ids
            .iter()
            .filter_map(|id| tables.posts.get(id).cloned())
            .collect();
        if !order_preserving {
            rows.sort_by_key(|row| row.post_id);
            rows.dedup_by_key(|row| row.post_id);
        }
        Ok(rows)
    }

    async fn count_by_filter(&self, filter: &PostFilter) -> StoreResult<u64> {
        let tables = self.read()?;
        Ok(tables.posts.values().filter(|row| filter.matches(row)).count() as u64)
    }

    async fn search_post_ids(
        &self,
        filter: &PostFilter,
        page: u64,
        size: u64,
    ) -> StoreResult<Vec<PostId>> {
        if page == 0 || size == 0 {
            return Err(StoreError::InvalidPage { page, size });
        }
        let offset = (page - 1).saturating_mul(size);
        let offset = usize::try_from(offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(size).unwrap_or(usize::MAX);

        let tables = self.read()?;
        Ok(Self::filtered(&tables, filter)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn vote_row(&self, post: PostId, user: UserId) -> StoreResult<Option<VoteRow>> {
        Ok(self.read()?.votes.get(&(post, user)).copied())
    }

    async fn votes_for_post(&self, post: PostId) -> StoreResult<Vec<VoteRow>> {
        let tables = self.read()?;
        let mut rows: Vec<VoteRow> = tables
            .votes
            .values()
            .filter(|row| row.post_id == post)
            .copied()
            .collect();
        rows.sort_by_key(|row| row.user_id);
        Ok(rows)
    }

    async fn scan_posts(&self, after: Option<PostId>, limit: usize) -> StoreResult<Vec<PostRow>> {
        use std::ops::Bound::{Excluded, Unbounded};

        let tables = self.read()?;
        let lower = after.map_or(Unbounded, Excluded);
        Ok(tables
            .posts
            .range((lower, Unbounded))
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }
}
