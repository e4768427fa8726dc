use std::sync::{Arc, Mutex, PoisonError};

use tally_cache::{CacheStats, RankingCache};
use tally_commit::{BatchCommitter, CommitStats, CommitterHandle};
use tally_intake::{enqueue_with_retry, IntakeQueue, RetryPolicy};
use tally_ledger::{
    InMemoryVoteLedger, LedgerReader, LedgerWriter, PostSnapshot, VoteLedger, VoteReceipt,
};
use tally_store::{
    DurableStore, InMemoryDurableStore, InMemoryStatusStore, PostFilter, PostRow, StatusStore,
};
use tally_types::{
    Clock, CommunityId, HybridClock, OrderingKey, PostId, SystemClock, Timestamp, UserId,
    VoteDirection, VoteIntakeEvent,
};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::idgen::{IdGenerator, SnowflakeGenerator};

/// Posts read per page while rebuilding the ledger from the store.
const WARM_PAGE: usize = 500;

/// A post as submitted by its author.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewPost {
    pub community: CommunityId,
    pub author: UserId,
    pub title: String,
    pub content: String,
}

/// A vote the ledger accepted and the intake queue took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteAccepted {
    pub receipt: VoteReceipt,
    pub seq: u64,
    pub submitted_at: Timestamp,
}

/// Listing request. `page` is 1-based.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListQuery {
    pub community: Option<CommunityId>,
    pub ordering: OrderingKey,
    pub page: u64,
    pub size: u64,
    pub search: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            community: None,
            ordering: OrderingKey::default(),
            page: 1,
            size: 10,
            search: None,
        }
    }
}

impl ListQuery {
    fn filter(&self) -> PostFilter {
        PostFilter {
            community: self.community,
            search: None,
        }
        .with_search(self.search.clone().unwrap_or_default())
    }

    fn is_search(&self) -> bool {
        self.search.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// One page of post ids plus the size of the whole result.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RankedPage {
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub ids: Vec<PostId>,
}

/// A stored post with its live vote figures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostView {
    pub post: PostRow,
    /// Users currently voting up.
    pub votes: i64,
    pub score: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostListing {
    pub total: u64,
    pub page: u64,
    pub size: u64,
    pub posts: Vec<PostView>,
}

/// Where one user's vote on one post stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VoteStatus {
    /// Direction in the ledger.
    pub direction: VoteDirection,
    /// Direction in the durable store, if a row exists.
    pub durable: Option<VoteDirection>,
    /// Whether a live acknowledgment flag covers the pair.
    pub acknowledged: bool,
}

impl VoteStatus {
    /// Ledger and durable store agree.
    pub fn is_settled(&self) -> bool {
        self.durable.unwrap_or_default() == self.direction
    }
}

/// Builder for an [`Engine`]. Unset parts default to the in-memory
/// implementations and the system clock.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    ledger: Option<Arc<dyn VoteLedger>>,
    store: Option<Arc<dyn DurableStore>>,
    status: Option<Arc<dyn StatusStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: None,
            ledger: None,
            store: None,
            status: None,
            ids: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn VoteLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn status_store(mut self, status: Arc<dyn StatusStore>) -> Self {
        self.status = Some(status);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validate the configuration and wire the components. Opening the
    /// intake queue replays its outbox when one is configured.
    pub fn build(self) -> EngineResult<Engine> {
        self.config.validate()?;
        let config = self.config;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let ledger: Arc<dyn VoteLedger> = match self.ledger {
            Some(ledger) => ledger,
            None => Arc::new(InMemoryVoteLedger::new()),
        };
        let store: Arc<dyn DurableStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryDurableStore::new()),
        };
        let status: Arc<dyn StatusStore> = match self.status {
            Some(status) => status,
            None => Arc::new(InMemoryStatusStore::new()),
        };
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(SnowflakeGenerator::new(config.node_id, clock.clone())?),
        };

        let queue = Arc::new(IntakeQueue::open(&config.intake.queue_config())?);
        let cache = RankingCache::new(&config.cache, clock.clone());
        let committer = Arc::new(BatchCommitter::new(
            queue.clone(),
            store.clone(),
            status.clone(),
            clock.clone(),
            config.commit.clone(),
        ));

        info!(
            node_id = config.node_id,
            cache_enabled = config.cache.enabled,
            durable_intake = config.intake.wal_path.is_some(),
            pending = queue.pending().unwrap_or(0),
            "engine built"
        );

        Ok(Engine {
            retry: config.intake.retry_policy(),
            config,
            stamps: HybridClock::new(clock.clone()),
            clock,
            ledger,
            cache,
            queue,
            store,
            status,
            ids,
            committer,
            handle: Mutex::new(None),
        })
    }
}

/// The vote ingestion and ranking engine.
pub struct Engine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    stamps: HybridClock,
    retry: RetryPolicy,
    ledger: Arc<dyn VoteLedger>,
    cache: RankingCache,
    queue: Arc<IntakeQueue>,
    store: Arc<dyn DurableStore>,
    status: Arc<dyn StatusStore>,
    ids: Arc<dyn IdGenerator>,
    committer: Arc<BatchCommitter>,
    handle: Mutex<Option<CommitterHandle>>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Engine over in-memory components and the system clock.
    pub fn in_memory(config: EngineConfig) -> EngineResult<Self> {
        EngineBuilder::new(config).build()
    }

    /// Spawn the background committer. Must run inside a tokio runtime.
    /// Calling it twice is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.is_none() {
            *handle = Some(Arc::clone(&self.committer).spawn());
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Close intake, stop the committer after a final drain and return its
    /// totals.
    pub async fn shutdown(&self) -> EngineResult<CommitStats> {
        self.queue.close();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let stats = match handle {
            Some(handle) => handle.shutdown().await?,
            None => {
                self.committer.drain().await?;
                self.committer.stats()
            }
        };
        info!(
            committed_rows = stats.committed_rows,
            failures = stats.failures,
            "engine stopped"
        );
        Ok(stats)
    }

    // ---- Votes ----

    /// Record a vote and queue it for persistence.
    ///
    /// The ledger decision is final once this returns anything other than
    /// `Rejected`: an `IntakeUnavailable` error means the vote counts but
    /// its durable write was logged for reconciliation.
    pub async fn submit_vote(
        &self,
        post: PostId,
        user: UserId,
        direction: VoteDirection,
    ) -> EngineResult<VoteAccepted> {
        let now = self.clock.now();
        let stamp = || self.stamps.tick();
        let receipt = self
            .ledger
            .submit_vote_stamped(post, user, direction, now, &stamp)?;

        let submitted_at = receipt.submitted_at;
        let event = VoteIntakeEvent::new(post, user, receipt.direction, submitted_at);
        let seq = enqueue_with_retry(&self.queue, &event, &self.retry).await?;

        debug!(
            post_id = %post,
            user_id = %user,
            direction = %receipt.direction,
            seq,
            "vote accepted"
        );
        Ok(VoteAccepted {
            receipt,
            seq,
            submitted_at,
        })
    }

    /// Users currently voting up on `post`.
    pub fn vote_count(&self, post: PostId) -> EngineResult<i64> {
        Ok(self.ledger.vote_count_for(post)?)
    }

    pub fn score(&self, post: PostId) -> EngineResult<i64> {
        Ok(self.ledger.score(post)?)
    }

    pub async fn vote_status(&self, post: PostId, user: UserId) -> EngineResult<VoteStatus> {
        let direction = self.ledger.direction_of(post, user)?;
        let durable = self.store.vote_row(post, user).await?.map(|r| r.direction);
        let acknowledged = self
            .status
            .status(post, user, self.clock.now())?
            .is_some();
        Ok(VoteStatus {
            direction,
            durable,
            acknowledged,
        })
    }

    // ---- Posts ----

    /// Store a post under a freshly generated id.
    pub async fn create_post(&self, post: NewPost) -> EngineResult<PostId> {
        let id = self.ids.next_id()?;
        self.create_post_with_id(id, post).await?;
        Ok(id)
    }

    /// Store a post under a caller-chosen id.
    pub async fn create_post_with_id(&self, id: PostId, post: NewPost) -> EngineResult<()> {
        let now = self.clock.now();
        let row = PostRow::new(id, post.author, post.community, post.title, post.content, now);

        self.store.insert_post(&row).await?;
        self.ledger
            .create_post(id, post.community, post.author, now)?;
        self.cache.invalidate(post.community);

        info!(post_id = %id, community_id = %post.community, author_id = %post.author, "post created");
        Ok(())
    }

    pub async fn get_post(&self, id: PostId) -> EngineResult<Option<PostView>> {
        let mut rows = self.store.query_posts_by_ids(&[id], true).await?;
        match rows.pop() {
            Some(post) => Ok(Some(self.view(post)?)),
            None => Ok(None),
        }
    }

    // ---- Listings ----

    /// One page of post ids.
    ///
    /// Searches are answered by the durable store, newest first. Everything
    /// else comes from the ledger orderings, through the ranking cache when
    /// a community is given.
    pub async fn list_ranked(&self, query: &ListQuery) -> EngineResult<RankedPage> {
        if query.page == 0 || query.size == 0 {
            return Err(EngineError::InvalidPage {
                page: query.page,
                size: query.size,
            });
        }

        let filter = query.filter();
        let ids = if query.is_search() {
            self.store
                .search_post_ids(&filter, query.page, query.size)
                .await?
        } else {
            self.cache.get_ranking(
                self.ledger.as_ref(),
                query.community,
                query.ordering,
                query.page,
                query.size,
            )?
        };
        let total = self.store.count_by_filter(&filter).await?;

        Ok(RankedPage {
            total,
            page: query.page,
            size: query.size,
            ids,
        })
    }

    /// [`Self::list_ranked`] with each id hydrated into a [`PostView`].
    pub async fn list_posts(&self, query: &ListQuery) -> EngineResult<PostListing> {
        let page = self.list_ranked(query).await?;
        if page.ids.is_empty() {
            return Ok(PostListing {
                total: page.total,
                page: page.page,
                size: page.size,
                posts: Vec::new(),
            });
        }

        let rows = self.store.query_posts_by_ids(&page.ids, true).await?;
        if rows.len() != page.ids.len() {
            warn!(
                requested = page.ids.len(),
                found = rows.len(),
                "ranked ids missing from the durable store"
            );
        }

        let ids: Vec<PostId> = rows.iter().map(|r| r.post_id).collect();
        let counts = self.ledger.vote_counts_for(&ids)?;
        let posts = rows
            .into_iter()
            .zip(counts)
            .map(|(post, votes)| {
                let score = self.ledger.score(post.post_id)?;
                Ok(PostView { post, votes, score })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(PostListing {
            total: page.total,
            page: page.page,
            size: page.size,
            posts,
        })
    }

    // ---- Maintenance ----

    /// Rebuild ledger entries for stored posts the ledger does not know.
    /// Returns how many posts were restored.
    ///
    /// Votes recovered from the intake log are committed first, so the
    /// rebuilt ledger includes them.
    pub async fn warm_from_store(&self) -> EngineResult<usize> {
        let recovered = self.committer.drain().await?;
        if recovered > 0 {
            debug!(recovered, "committed recovered intake events before warming");
        }

        let mut restored = 0;
        let mut cursor = None;

        loop {
            let rows = self.store.scan_posts(cursor, WARM_PAGE).await?;
            let Some(last) = rows.last() else {
                break;
            };
            cursor = Some(last.post_id);

            for row in &rows {
                if self.ledger.created_at(row.post_id)?.is_some() {
                    continue;
                }
                let votes = self
                    .store
                    .votes_for_post(row.post_id)
                    .await?
                    .into_iter()
                    .map(|v| {
                        self.stamps.observe(v.submitted_at);
                        (v.user_id, v.direction)
                    })
                    .collect();
                self.ledger.restore_post(&PostSnapshot {
                    post_id: row.post_id,
                    community_id: row.community_id,
                    author_id: row.author_id,
                    created_at: row.created_at,
                    votes,
                })?;
                restored += 1;
            }
        }

        self.cache.clear();
        info!(restored, "ledger warmed from durable store");
        Ok(restored)
    }

    /// Commit everything queued so far. Returns the deliveries handled.
    pub async fn flush(&self) -> EngineResult<usize> {
        Ok(self.committer.drain().await?)
    }

    pub fn commit_stats(&self) -> CommitStats {
        self.committer.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Events waiting in the intake queue.
    pub fn pending_events(&self) -> EngineResult<usize> {
        Ok(self.queue.pending()?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn VoteLedger> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<IntakeQueue> {
        &self.queue
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn view(&self, post: PostRow) -> EngineResult<PostView> {
        Ok(PostView {
            votes: self.ledger.vote_count_for(post.post_id)?,
            score: self.ledger.score(post.post_id)?,
            post,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tally_types::ManualClock;

    const T0_MS: u64 = 1_700_000_000_000;

    fn engine() -> (Engine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0_MS)));
        let engine = Engine::builder(EngineConfig::default())
            .clock(clock.clone())
            .build()
            .unwrap();
        (engine, clock)
    }

    fn new_post(community: u64, author: u64, title: &str) -> NewPost {
        NewPost {
            community: CommunityId::new(community),
            author: UserId::new(author),
            title: title.into(),
            content: format!("body of {title}"),
        }
    }

    #[tokio::test]
    async fn vote_lands_in_ledger_then_store() {
        let (engine, _) = engine();
        let post = engine.create_post(new_post(1, 1, "hello")).await.unwrap();

        let accepted = engine
            .submit_vote(post, UserId::new(2), VoteDirection::Up)
            .await
            .unwrap();
        assert_eq!(accepted.receipt.score, 864);
        assert_eq!(engine.vote_count(post).unwrap(), 2);
        assert_eq!(engine.pending_events().unwrap(), 1);

        let status = engine.vote_status(post, UserId::new(2)).await.unwrap();
        assert!(!status.is_settled());

        assert_eq!(engine.flush().await.unwrap(), 1);
        let status = engine.vote_status(post, UserId::new(2)).await.unwrap();
        assert_eq!(status.durable, Some(VoteDirection::Up));
        assert!(status.acknowledged && status.is_settled());
    }

    #[tokio::test]
    async fn rejections_do_not_enqueue() {
        let (engine, clock) = engine();
        let post = engine.create_post(new_post(1, 1, "a")).await.unwrap();

        let err = engine
            .submit_vote(post, UserId::new(1), VoteDirection::Up)
            .await
            .unwrap_err();
        assert_eq!(err.reject_reason(), Some(crate::RejectReason::DuplicateVote));

        clock.advance(Duration::from_secs(7 * 24 * 3600 + 1));
        let err = engine
            .submit_vote(post, UserId::new(2), VoteDirection::Up)
            .await
            .unwrap_err();
        assert_eq!(
            err.reject_reason(),
            Some(crate::RejectReason::VoteWindowExpired)
        );
        assert_eq!(engine.pending_events().unwrap(), 0);
    }

    #[tokio::test]
    async fn stamps_are_ordered_within_one_millisecond() {
        let (engine, _) = engine();
        let post = engine.create_post(new_post(1, 1, "a")).await.unwrap();
        let user = UserId::new(2);

        let a = engine.submit_vote(post, user, VoteDirection::Up).await.unwrap();
        let b = engine.submit_vote(post, user, VoteDirection::Down).await.unwrap();
        assert!(b.submitted_at > a.submitted_at);

        engine.flush().await.unwrap();
        let row = engine.store().vote_row(post, user).await.unwrap().unwrap();
        assert_eq!(row.direction, VoteDirection::Down);
    }

    #[tokio::test]
    async fn full_intake_reports_unavailable_but_keeps_vote() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0_MS)));
        let mut config = EngineConfig::default();
        config.intake.capacity = 1;
        config.intake.enqueue_retries = 1;
        config.intake.enqueue_backoff_ms = 1;
        let engine = Engine::builder(config).clock(clock).build().unwrap();
        let post = engine.create_post(new_post(1, 1, "a")).await.unwrap();

        engine
            .submit_vote(post, UserId::new(2), VoteDirection::Up)
            .await
            .unwrap();
        let err = engine
            .submit_vote(post, UserId::new(3), VoteDirection::Up)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::IntakeUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(engine.vote_count(post).unwrap(), 3);
    }

    #[tokio::test]
    async fn search_goes_to_the_store() {
        let (engine, clock) = engine();
        for title in ["rust async", "go channels", "Rust traits"] {
            engine.create_post(new_post(1, 1, title)).await.unwrap();
            clock.advance(Duration::from_secs(1));
        }

        let page = engine
            .list_posts(&ListQuery {
                search: Some("rust".into()),
                ..ListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);
        let titles: Vec<&str> = page.posts.iter().map(|p| p.post.title.as_str()).collect();
        assert_eq!(titles, vec!["Rust traits", "rust async"]);
    }

    #[tokio::test]
    async fn duplicate_post_id_is_rejected() {
        let (engine, _) = engine();
        let id = PostId::new(42);
        engine
            .create_post_with_id(id, new_post(1, 1, "a"))
            .await
            .unwrap();
        let err = engine
            .create_post_with_id(id, new_post(1, 1, "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PostExists(p) if p == id));
    }

    #[tokio::test]
    async fn warm_restores_posts_and_votes() {
        let (engine, _) = engine();
        let post = engine.create_post(new_post(3, 1, "a")).await.unwrap();
        engine
            .submit_vote(post, UserId::new(2), VoteDirection::Down)
            .await
            .unwrap();
        engine.flush().await.unwrap();

        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0_MS)));
        let restarted = Engine::builder(EngineConfig::default())
            .clock(clock)
            .store(engine.store().clone())
            .build()
            .unwrap();
        assert_eq!(restarted.score(post).unwrap(), 0);

        assert_eq!(restarted.warm_from_store().await.unwrap(), 1);
        assert_eq!(restarted.score(post).unwrap(), 0);
        assert_eq!(
            restarted
                .ledger()
                .direction_of(post, UserId::new(2))
                .unwrap(),
            VoteDirection::Down
        );
        assert_eq!(restarted.vote_count(post).unwrap(), 1);
        assert_eq!(restarted.warm_from_store().await.unwrap(), 0);
    }

    struct FixedIds(std::sync::atomic::AtomicU64);

    impl IdGenerator for FixedIds {
        fn next_id(&self) -> EngineResult<PostId> {
            let next = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(PostId::new(next))
        }
    }

    #[tokio::test]
    async fn builder_accepts_injected_parts() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_millis(T0_MS)));
        let status = Arc::new(InMemoryStatusStore::new());
        let engine = Engine::builder(EngineConfig::default())
            .clock(clock)
            .id_generator(Arc::new(FixedIds(std::sync::atomic::AtomicU64::new(100))))
            .status_store(status.clone())
            .build()
            .unwrap();

        let a = engine.create_post(new_post(1, 1, "a")).await.unwrap();
        let b = engine.create_post(new_post(1, 1, "b")).await.unwrap();
        assert_eq!((a, b), (PostId::new(100), PostId::new(101)));

        engine
            .submit_vote(a, UserId::new(2), VoteDirection::Up)
            .await
            .unwrap();
        engine.flush().await.unwrap();
        assert_eq!(status.len().unwrap(), 1);

        let query = ListQuery {
            community: Some(CommunityId::new(1)),
            ordering: OrderingKey::Score,
            ..ListQuery::default()
        };
        engine.list_ranked(&query).await.unwrap();
        engine.list_ranked(&query).await.unwrap();
        let stats = engine.cache_stats();
        assert_eq!((stats.misses, stats.hits, stats.entries), (1, 1, 1));
    }

    #[tokio::test]
    async fn zero_page_is_invalid() {
        let (engine, _) = engine();
        let err = engine
            .list_ranked(&ListQuery {
                page: 0,
                ..ListQuery::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPage { page: 0, size: 10 }));
    }
}
