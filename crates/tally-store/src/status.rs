use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tally_types::{IdempotencyKey, PostId, Timestamp, UserId};

use crate::error::{StoreError, StoreResult};

/// Acknowledgment flag for one `(post, user)` pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusRecord {
    /// Submission time of the newest event made durable for the pair.
    pub submitted_at: Timestamp,
    pub expires_at: Timestamp,
}

/// Short-lived record of which vote events are already durable.
///
/// A flag covers every event for the pair submitted at or before the
/// recorded time. Expired flags read as absent.
pub trait StatusStore: Send + Sync {
    fn mark_persisted(&self, key: IdempotencyKey, ttl: Duration, now: Timestamp)
        -> StoreResult<()>;

    fn is_persisted(&self, key: &IdempotencyKey, now: Timestamp) -> StoreResult<bool>;

    fn status(&self, post: PostId, user: UserId, now: Timestamp)
        -> StoreResult<Option<StatusRecord>>;

    /// Drop expired flags, returning how many were removed.
    fn purge_expired(&self, now: Timestamp) -> StoreResult<usize>;
}

/// `HashMap`-backed status store.
#[derive(Default)]
pub struct InMemoryStatusStore {
    flags: RwLock<HashMap<(PostId, UserId), StatusRecord>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self
            .flags
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl StatusStore for InMemoryStatusStore {
    fn mark_persisted(
        &self,
        key: IdempotencyKey,
        ttl: Duration,
        now: Timestamp,
    ) -> StoreResult<()> {
        let mut flags = self.flags.write().map_err(|_| StoreError::LockPoisoned)?;
        let expires_at = now.saturating_add(ttl);
        let entry = flags
            .entry((key.post_id, key.user_id))
            .or_insert(StatusRecord {
                submitted_at: key.submitted_at,
                expires_at,
            });
        entry.submitted_at = entry.submitted_at.max(key.submitted_at);
        entry.expires_at = expires_at;
        Ok(())
    }

    fn is_persisted(&self, key: &IdempotencyKey, now: Timestamp) -> StoreResult<bool> {
        Ok(self
            .status(key.post_id, key.user_id, now)?
            .is_some_and(|record| record.submitted_at >= key.submitted_at))
    }

    fn status(
        &self,
        post: PostId,
        user: UserId,
        now: Timestamp,
    ) -> StoreResult<Option<StatusRecord>> {
        let flags = self.flags.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(flags
            .get(&(post, user))
            .filter(|record| record.expires_at > now)
            .copied())
    }

    fn purge_expired(&self, now: Timestamp) -> StoreResult<usize> {
        let mut flags = self.flags.write().map_err(|_| StoreError::LockPoisoned)?;
        let before = flags.len();
        flags.retain(|_, record| record.expires_at > now);
        Ok(before - flags.len())
    }
}
