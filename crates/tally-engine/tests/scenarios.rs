use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tally_engine::{
    CommunityId, Engine, EngineConfig, EngineError, ListQuery, NewPost, OrderingKey, PostId,
    RejectReason, Timestamp, UserId, VoteDirection,
};
use tally_ledger::LedgerReader;
use tally_store::{DurableStore, InMemoryDurableStore};
use tally_types::{Clock, ManualClock};

const T0_MS: u64 = 1_700_000_000_000;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Timestamp::from_millis(T0_MS)))
}

/// Fixed time, but each read stalls for a varying moment so concurrent
/// submitters interleave.
struct JitterClock {
    reads: AtomicU64,
}

impl Clock for JitterClock {
    fn now(&self) -> Timestamp {
        let n = self.reads.fetch_add(1, Ordering::Relaxed);
        std::thread::sleep(Duration::from_micros(n % 7 * 20));
        Timestamp::from_millis(T0_MS)
    }
}

fn post(community: u64, author: u64, title: &str) -> NewPost {
    NewPost {
        community: CommunityId::new(community),
        author: UserId::new(author),
        title: title.to_string(),
        content: String::new(),
    }
}

#[tokio::test]
async fn vote_sequence_walkthrough() {
    let engine = Engine::builder(EngineConfig::default())
        .clock(clock())
        .build()
        .unwrap();
    let p1 = engine.create_post(post(1, 1, "P1")).await.unwrap();
    let u2 = UserId::new(2);

    assert_eq!(engine.score(p1).unwrap(), 432);

    let up = engine.submit_vote(p1, u2, VoteDirection::Up).await.unwrap();
    assert_eq!((up.receipt.delta, up.receipt.score), (432, 864));

    let down = engine.submit_vote(p1, u2, VoteDirection::Down).await.unwrap();
    assert_eq!((down.receipt.delta, down.receipt.score), (-864, 0));

    let err = engine
        .submit_vote(p1, u2, VoteDirection::Down)
        .await
        .unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::DuplicateVote));
    assert_eq!(engine.score(p1).unwrap(), 0);

    engine.flush().await.unwrap();
    let row = engine.store().vote_row(p1, u2).await.unwrap().unwrap();
    assert_eq!(row.direction, VoteDirection::Down);
}

#[tokio::test]
async fn window_boundary_is_inclusive() {
    let clock = clock();
    let engine = Engine::builder(EngineConfig::default())
        .clock(clock.clone())
        .build()
        .unwrap();
    let p = engine.create_post(post(1, 1, "P")).await.unwrap();
    let week = Duration::from_secs(7 * 24 * 3600);

    clock.advance(week - Duration::from_secs(1));
    engine
        .submit_vote(p, UserId::new(2), VoteDirection::Up)
        .await
        .unwrap();

    clock.advance(Duration::from_secs(2));
    let err = engine
        .submit_vote(p, UserId::new(3), VoteDirection::Up)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rejected(RejectReason::VoteWindowExpired)
    ));
}

#[tokio::test]
async fn voting_on_unknown_post_is_expired() {
    let engine = Engine::builder(EngineConfig::default())
        .clock(clock())
        .build()
        .unwrap();
    let err = engine
        .submit_vote(PostId::new(999), UserId::new(1), VoteDirection::Up)
        .await
        .unwrap_err();
    assert_eq!(err.reject_reason(), Some(RejectReason::VoteWindowExpired));
    assert_eq!(engine.vote_count(PostId::new(999)).unwrap(), 0);
}

#[tokio::test]
async fn community_listing_by_score() {
    let clock = clock();
    let engine = Engine::builder(EngineConfig::default())
        .clock(clock.clone())
        .build()
        .unwrap();

    let mut in_c = Vec::new();
    for i in 0..4 {
        in_c.push(engine.create_post(post(7, 1, &format!("c{i}"))).await.unwrap());
        engine.create_post(post(8, 1, &format!("other{i}"))).await.unwrap();
        clock.advance(Duration::from_secs(10));
    }
    // Push the oldest community post to the top.
    for user in 10..13 {
        engine
            .submit_vote(in_c[0], UserId::new(user), VoteDirection::Up)
            .await
            .unwrap();
    }

    let page = engine
        .list_ranked(&ListQuery {
            community: Some(CommunityId::new(7)),
            ordering: OrderingKey::Score,
            page: 1,
            size: 10,
            search: None,
        })
        .await
        .unwrap();
    assert_eq!(page.total, 4);
    assert_eq!(page.ids, vec![in_c[0], in_c[3], in_c[2], in_c[1]]);

    let by_time = engine
        .list_ranked(&ListQuery {
            community: Some(CommunityId::new(7)),
            ordering: OrderingKey::Time,
            page: 2,
            size: 3,
            search: None,
        })
        .await
        .unwrap();
    assert_eq!(by_time.ids, vec![in_c[0]]);

    let empty = engine
        .list_ranked(&ListQuery {
            community: Some(CommunityId::new(99)),
            ordering: OrderingKey::Score,
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert!(empty.ids.is_empty());
    assert_eq!(empty.total, 0);
}

#[tokio::test]
async fn global_listing_and_hydration() {
    let clock = clock();
    let engine = Engine::builder(EngineConfig::default())
        .clock(clock.clone())
        .build()
        .unwrap();
    let a = engine.create_post(post(1, 1, "a")).await.unwrap();
    clock.advance(Duration::from_secs(1));
    let b = engine.create_post(post(2, 1, "b")).await.unwrap();
    engine
        .submit_vote(a, UserId::new(5), VoteDirection::Up)
        .await
        .unwrap();

    let listing = engine
        .list_posts(&ListQuery {
            ordering: OrderingKey::Score,
            ..ListQuery::default()
        })
        .await
        .unwrap();
    assert_eq!(listing.total, 2);
    let ids: Vec<PostId> = listing.posts.iter().map(|v| v.post.post_id).collect();
    assert_eq!(ids, vec![a, b]);
    assert_eq!((listing.posts[0].votes, listing.posts[0].score), (2, 864));

    let view = engine.get_post(b).await.unwrap().unwrap();
    assert_eq!(view.post.title, "b");
    assert!(engine.get_post(PostId::new(1)).await.unwrap().is_none());
}

#[tokio::test]
async fn failed_batch_applies_nothing_then_everything() {
    let store = Arc::new(InMemoryDurableStore::new());
    let engine = Engine::builder(EngineConfig::default())
        .clock(clock())
        .store(store.clone())
        .build()
        .unwrap();
    let p = engine.create_post(post(1, 1, "p")).await.unwrap();
    for user in 2..=4 {
        engine
            .submit_vote(p, UserId::new(user), VoteDirection::Up)
            .await
            .unwrap();
    }

    store.fail_next_commits(1);
    let err = engine.flush().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(store.vote_row_count().unwrap(), 0);
    assert_eq!(engine.pending_events().unwrap(), 3);

    assert_eq!(engine.flush().await.unwrap(), 3);
    assert_eq!(store.vote_row_count().unwrap(), 3);
    assert_eq!(engine.commit_stats().failures, 1);
}

#[tokio::test]
async fn poison_event_does_not_block_valid_votes() {
    let mut config = EngineConfig::default();
    config.commit.max_attempts = 2;
    let engine = Engine::builder(config).clock(clock()).build().unwrap();
    let p = engine.create_post(post(1, 1, "p")).await.unwrap();

    engine
        .queue()
        .enqueue_raw(br#"{"post_id":1,"user_id":1,"direction":5,"submitted_at":0}"#.to_vec())
        .unwrap();
    engine
        .submit_vote(p, UserId::new(2), VoteDirection::Up)
        .await
        .unwrap();

    engine.flush().await.unwrap();
    assert!(engine
        .store()
        .vote_row(p, UserId::new(2))
        .await
        .unwrap()
        .is_some());

    engine.flush().await.unwrap();
    assert_eq!(engine.pending_events().unwrap(), 0);
    assert_eq!(engine.commit_stats().dropped_poison, 1);
}

#[tokio::test]
async fn restart_redelivers_unacked_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.intake.wal_path = Some(dir.path().join("intake.wal"));
    config.intake.sync_every_write = true;

    let store = Arc::new(InMemoryDurableStore::new());
    let p;
    {
        let engine = Engine::builder(config.clone())
            .clock(clock())
            .store(store.clone())
            .build()
            .unwrap();
        p = engine.create_post(post(1, 1, "p")).await.unwrap();
        engine
            .submit_vote(p, UserId::new(2), VoteDirection::Up)
            .await
            .unwrap();
        engine.flush().await.unwrap();
        engine
            .submit_vote(p, UserId::new(3), VoteDirection::Down)
            .await
            .unwrap();
        engine
            .submit_vote(p, UserId::new(4), VoteDirection::Up)
            .await
            .unwrap();
        // Dropped without flushing.
    }
    assert_eq!(store.vote_row_count().unwrap(), 1);

    let engine = Engine::builder(config)
        .clock(clock())
        .store(store.clone())
        .build()
        .unwrap();
    assert_eq!(engine.pending_events().unwrap(), 2);
    assert_eq!(engine.flush().await.unwrap(), 2);
    assert_eq!(store.vote_row_count().unwrap(), 3);
    assert_eq!(store.commit_count(), 2);

    // Author up, U2 up, U3 down, U4 up.
    assert_eq!(engine.warm_from_store().await.unwrap(), 1);
    assert_eq!(engine.score(p).unwrap(), 864);
}

#[tokio::test]
async fn warming_commits_recovered_events_first() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.intake.wal_path = Some(dir.path().join("intake.wal"));
    config.intake.sync_every_write = true;

    let store = Arc::new(InMemoryDurableStore::new());
    let p;
    {
        let engine = Engine::builder(config.clone())
            .clock(clock())
            .store(store.clone())
            .build()
            .unwrap();
        p = engine.create_post(post(1, 1, "p")).await.unwrap();
        engine
            .submit_vote(p, UserId::new(2), VoteDirection::Up)
            .await
            .unwrap();
        engine.flush().await.unwrap();
        engine
            .submit_vote(p, UserId::new(3), VoteDirection::Down)
            .await
            .unwrap();
        engine
            .submit_vote(p, UserId::new(4), VoteDirection::Up)
            .await
            .unwrap();
    }

    let engine = Engine::builder(config)
        .clock(clock())
        .store(store.clone())
        .build()
        .unwrap();
    assert_eq!(engine.warm_from_store().await.unwrap(), 1);
    assert_eq!(engine.pending_events().unwrap(), 0);
    assert_eq!(store.vote_row_count().unwrap(), 3);

    let ledger = engine.ledger();
    assert_eq!(ledger.direction_of(p, UserId::new(3)).unwrap(), VoteDirection::Down);
    assert_eq!(ledger.direction_of(p, UserId::new(4)).unwrap(), VoteDirection::Up);
    assert_eq!(engine.score(p).unwrap(), 864);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_flips_persist_the_final_direction() {
    let clock = Arc::new(JitterClock {
        reads: AtomicU64::new(0),
    });
    let engine = Arc::new(
        Engine::builder(EngineConfig::default())
            .clock(clock)
            .build()
            .unwrap(),
    );
    let p = engine.create_post(post(1, 1, "p")).await.unwrap();
    let user = UserId::new(2);

    for _ in 0..20 {
        let mut tasks = Vec::new();
        for i in 0..8 {
            let engine = Arc::clone(&engine);
            let direction = if i % 2 == 0 {
                VoteDirection::Up
            } else {
                VoteDirection::Down
            };
            tasks.push(tokio::spawn(async move {
                match engine.submit_vote(p, user, direction).await {
                    Ok(_) | Err(EngineError::Rejected(_)) => {}
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        engine.flush().await.unwrap();
        let stored = engine.store().vote_row(p, user).await.unwrap().map(|r| r.direction);
        let live = engine.ledger().direction_of(p, user).unwrap();
        assert_eq!(stored, Some(live));
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn failing_log_write_is_unavailable_not_lost() {
    let mut config = EngineConfig::default();
    config.intake.wal_path = Some("/dev/full".into());
    config.intake.enqueue_retries = 1;
    config.intake.enqueue_backoff_ms = 1;
    let engine = Engine::builder(config).clock(clock()).build().unwrap();
    let p = engine.create_post(post(1, 1, "p")).await.unwrap();

    let err = engine
        .submit_vote(p, UserId::new(2), VoteDirection::Up)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IntakeUnavailable(_)));
    assert!(err.is_retryable());
    assert_eq!(
        engine.ledger().direction_of(p, UserId::new(2)).unwrap(),
        VoteDirection::Up
    );
}

#[tokio::test]
async fn background_committer_drains_on_shutdown() {
    let mut config = EngineConfig::default();
    config.commit.batch_interval_ms = 20;
    let engine = Engine::builder(config).clock(clock()).build().unwrap();
    engine.start();
    assert!(engine.is_running());

    let p = engine.create_post(post(1, 1, "p")).await.unwrap();
    for user in 2..=6 {
        engine
            .submit_vote(p, UserId::new(user), VoteDirection::Up)
            .await
            .unwrap();
    }

    let stats = engine.shutdown().await.unwrap();
    assert_eq!(stats.committed_rows, 5);
    assert!(!engine.is_running());

    let err = engine
        .submit_vote(p, UserId::new(9), VoteDirection::Up)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IntakeUnavailable(_)));
}
