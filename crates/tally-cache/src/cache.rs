use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_ledger::{page_offset, LedgerReader, RankedEntry};
use tally_types::{Clock, CommunityId, OrderingKey, PostId, Timestamp};
use tracing::{debug, warn};

use crate::error::CacheResult;

/// Ranking cache settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            enabled: true,
        }
    }
}

/// A computed community ranking. Never mutated after publication.
#[derive(Clone, Debug, PartialEq)]
pub struct Materialized {
    pub community: CommunityId,
    pub ordering: OrderingKey,
    pub entries: Vec<RankedEntry>,
    pub computed_at: Timestamp,
    pub expires_at: Timestamp,
}

impl Materialized {
    pub fn is_fresh(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    pub fn page(&self, offset: usize, limit: usize) -> Vec<PostId> {
        self.entries
            .iter()
            .skip(offset)
            .take(limit)
            .map(|e| e.post_id)
            .collect()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

type Key = (OrderingKey, CommunityId);

/// TTL-bound map of `(ordering, community)` to a materialized ranking.
///
/// Entries are published by replacing the `Arc`; readers holding an older
/// `Arc` keep a consistent list. The ledger is read outside the map lock.
pub struct RankingCache {
    ttl: Duration,
    enabled: bool,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<Key, Arc<Materialized>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RankingCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_secs),
            enabled: config.enabled,
            clock,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A cache that always computes from the ledger.
    pub fn disabled(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            &CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
            clock,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// One page of a community ranking, highest first.
    pub fn get_community_ranking<R: LedgerReader + ?Sized>(
        &self,
        ledger: &R,
        community: CommunityId,
        ordering: OrderingKey,
        page: u64,
        size: u64,
    ) -> CacheResult<Vec<PostId>> {
        let offset = page_offset(page, size)?;
        let limit = usize::try_from(size).unwrap_or(usize::MAX);
        let materialized = self.materialized(ledger, community, ordering)?;
        Ok(materialized.page(offset, limit))
    }

    /// One page of a ranking scope. `None` is the global scope, which pages
    /// straight from the ledger ordering.
    pub fn get_ranking<R: LedgerReader + ?Sized>(
        &self,
        ledger: &R,
        community: Option<CommunityId>,
        ordering: OrderingKey,
        page: u64,
        size: u64,
    ) -> CacheResult<Vec<PostId>> {
        match community {
            Some(c) => self.get_community_ranking(ledger, c, ordering, page, size),
            None => Ok(ledger.list_ordered(ordering, page, size)?),
        }
    }

    /// The full materialized ranking for a community, computing and
    /// publishing it on a miss.
    pub fn materialized<R: LedgerReader + ?Sized>(
        &self,
        ledger: &R,
        community: CommunityId,
        ordering: OrderingKey,
    ) -> CacheResult<Arc<Materialized>> {
        let now = self.clock.now();
        let key = (ordering, community);

        if self.enabled {
            if let Some(hit) = self.lookup(&key, now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(hit);
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        let entries = ledger.community_ranking(community, ordering)?;
        let fresh = Arc::new(Materialized {
            community,
            ordering,
            entries,
            computed_at: now,
            expires_at: now.saturating_add(self.ttl),
        });

        if self.enabled {
            self.publish(key, Arc::clone(&fresh), now);
            debug!(
                community_id = %community,
                ordering = %ordering,
                entries = fresh.entries.len(),
                "community ranking materialized"
            );
        }
        Ok(fresh)
    }

    /// Drop every entry for a community.
    pub fn invalidate(&self, community: CommunityId) {
        match self.entries.write() {
            Ok(mut map) => map.retain(|(_, c), _| *c != community),
            Err(_) => warn!("ranking cache lock poisoned; skipping invalidate"),
        }
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        match self.entries.write() {
            Ok(mut map) => {
                let before = map.len();
                map.retain(|_, m| m.is_fresh(now));
                before - map.len()
            }
            Err(_) => 0,
        }
    }

    pub fn clear(&self) {
        if let Ok(mut map) = self.entries.write() {
            map.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    fn lookup(&self, key: &Key, now: Timestamp) -> Option<Arc<Materialized>> {
        match self.entries.read() {
            Ok(map) => map.get(key).filter(|m| m.is_fresh(now)).cloned(),
            Err(_) => {
                warn!("ranking cache lock poisoned; computing from ledger");
                None
            }
        }
    }

    /// Inserting also sweeps expired entries, so keys that stop being read
    /// do not accumulate.
    fn publish(&self, key: Key, materialized: Arc<Materialized>, now: Timestamp) {
        match self.entries.write() {
            Ok(mut map) => {
                map.retain(|_, m| m.is_fresh(now));
                map.insert(key, materialized);
            }
            Err(_) => warn!("ranking cache lock poisoned; result not cached"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_ledger::{InMemoryVoteLedger, LedgerWriter};
    use tally_types::{ManualClock, UserId, VoteDirection};

    const T0: u64 = 1_700_000_000;

    fn setup() -> (Arc<ManualClock>, InMemoryVoteLedger) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(T0)));
        let ledger = InMemoryVoteLedger::new();
        let c1 = CommunityId::new(1);
        let c2 = CommunityId::new(2);
        for (post, community, offset) in [(1, c1, 0), (2, c2, 1), (3, c1, 2), (4, c1, 3)] {
            ledger
                .create_post(
                    PostId::new(post),
                    community,
                    UserId::new(100),
                    Timestamp::from_secs(T0 + offset),
                )
                .unwrap();
        }
        (clock, ledger)
    }

    fn ids(raw: &[u64]) -> Vec<PostId> {
        raw.iter().copied().map(PostId::new).collect()
    }

    #[test]
    fn miss_then_hit_pages_the_same_list() {
        let (clock, ledger) = setup();
        let cache = RankingCache::new(&CacheConfig::default(), clock);
        let c1 = CommunityId::new(1);

        let first = cache
            .get_community_ranking(&ledger, c1, OrderingKey::Time, 1, 2)
            .unwrap();
        assert_eq!(first, ids(&[4, 3]));
        let second = cache
            .get_community_ranking(&ledger, c1, OrderingKey::Time, 2, 2)
            .unwrap();
        assert_eq!(second, ids(&[1]));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn stale_until_ttl_then_recomputed() {
        let (clock, ledger) = setup();
        let cache = RankingCache::new(&CacheConfig::default(), clock.clone());
        let c1 = CommunityId::new(1);

        let before = cache
            .get_community_ranking(&ledger, c1, OrderingKey::Score, 1, 10)
            .unwrap();
        assert_eq!(before, ids(&[4, 3, 1]));

        ledger
            .submit_vote(
                PostId::new(1),
                UserId::new(7),
                VoteDirection::Up,
                Timestamp::from_secs(T0 + 5),
            )
            .unwrap();

        let cached = cache
            .get_community_ranking(&ledger, c1, OrderingKey::Score, 1, 10)
            .unwrap();
        assert_eq!(cached, before);

        clock.advance(Duration::from_secs(60));
        let fresh = cache
            .get_community_ranking(&ledger, c1, OrderingKey::Score, 1, 10)
            .unwrap();
        assert_eq!(fresh, ids(&[1, 4, 3]));
    }

    #[test]
    fn disabled_cache_matches_enabled_result() {
        let (clock, ledger) = setup();
        let enabled = RankingCache::new(&CacheConfig::default(), clock.clone());
        let disabled = RankingCache::disabled(clock);
        assert!(enabled.is_enabled() && !disabled.is_enabled());
        let c1 = CommunityId::new(1);

        for ordering in [OrderingKey::Time, OrderingKey::Score] {
            assert_eq!(
                enabled
                    .get_community_ranking(&ledger, c1, ordering, 1, 10)
                    .unwrap(),
                disabled
                    .get_community_ranking(&ledger, c1, ordering, 1, 10)
                    .unwrap()
            );
        }
        assert!(disabled.is_empty());
    }

    #[test]
    fn cached_page_is_subset_of_uncached_in_order() {
        let (clock, ledger) = setup();
        let cache = RankingCache::new(&CacheConfig::default(), clock);
        let c1 = CommunityId::new(1);
        cache.materialized(&ledger, c1, OrderingKey::Score).unwrap();

        let full: Vec<PostId> = ledger
            .community_ranking(c1, OrderingKey::Score)
            .unwrap()
            .into_iter()
            .map(|e| e.post_id)
            .collect();
        let page = cache
            .get_community_ranking(&ledger, c1, OrderingKey::Score, 1, 2)
            .unwrap();
        assert_eq!(page[..], full[..2]);
    }

    #[test]
    fn empty_community_and_global_scope() {
        let (clock, ledger) = setup();
        let cache = RankingCache::new(&CacheConfig::default(), clock);

        assert!(cache
            .get_community_ranking(&ledger, CommunityId::new(42), OrderingKey::Score, 1, 10)
            .unwrap()
            .is_empty());
        assert_eq!(
            cache
                .get_ranking(&ledger, None, OrderingKey::Time, 1, 2)
                .unwrap(),
            ids(&[4, 3])
        );
        assert!(cache
            .get_ranking(&ledger, Some(CommunityId::new(1)), OrderingKey::Time, 0, 2)
            .is_err());
    }

    #[test]
    fn invalidate_and_purge() {
        let (clock, ledger) = setup();
        let cache = RankingCache::new(&CacheConfig::default(), clock.clone());
        for c in [1, 2] {
            cache
                .materialized(&ledger, CommunityId::new(c), OrderingKey::Time)
                .unwrap();
        }
        assert_eq!(cache.len(), 2);

        cache.invalidate(CommunityId::new(1));
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn publish_sweeps_expired_entries() {
        let (clock, ledger) = setup();
        let cache = RankingCache::new(&CacheConfig::default(), clock.clone());
        for ordering in [OrderingKey::Time, OrderingKey::Score] {
            cache
                .materialized(&ledger, CommunityId::new(1), ordering)
                .unwrap();
        }
        assert_eq!(cache.len(), 2);

        clock.advance(Duration::from_secs(61));
        cache
            .materialized(&ledger, CommunityId::new(2), OrderingKey::Time)
            .unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.purge_expired(), 0);
    }
}
