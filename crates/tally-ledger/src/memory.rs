use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tally_types::{CommunityId, OrderingKey, PostId, Timestamp, UserId, VoteDirection};
use tracing::debug;

use crate::error::LedgerError;
use crate::scoring::{apply_vote, hot_rank, is_within_window, VoteOutcome, VOTE_WEIGHT};
use crate::sorted::{rank_descending, Aggregate, SortedSet};
use crate::traits::{
    page_offset, LedgerReader, LedgerWriter, PostSnapshot, RankedEntry, VoteReceipt,
};
use crate::validation::{ConsistencyReport, ConsistencyValidator};

/// Score every member of a community carries into an intersection.
pub const MEMBERSHIP_WEIGHT: f64 = 1.0;

/// In-memory vote ledger for tests, local runs and embedding.
///
/// VoteRecords, both indices and community membership live behind a single
/// `RwLock`, so a vote's record update and index increment are one step.
pub struct InMemoryVoteLedger {
    inner: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    score_index: SortedSet<PostId>,
    time_index: SortedSet<PostId>,
    created: HashMap<PostId, Timestamp>,
    authors: HashMap<PostId, UserId>,
    post_community: HashMap<PostId, CommunityId>,
    communities: HashMap<CommunityId, HashSet<PostId>>,
    voters: HashMap<PostId, HashMap<UserId, VoteDirection>>,
}

impl LedgerState {
    fn insert_post(
        &mut self,
        post: PostId,
        community: CommunityId,
        author: UserId,
        created: Timestamp,
        voters: HashMap<UserId, VoteDirection>,
    ) {
        let sum: i64 = voters.values().map(|d| d.value()).sum();
        self.score_index
            .insert(post, hot_rank(created, VOTE_WEIGHT * sum));
        self.time_index.insert(post, created.as_secs() as f64);
        self.created.insert(post, created);
        self.authors.insert(post, author);
        self.post_community.insert(post, community);
        self.communities.entry(community).or_default().insert(post);
        self.voters.insert(post, voters);
    }

    fn score_of(&self, post: PostId) -> i64 {
        match (self.score_index.score(&post), self.created.get(&post)) {
            (Some(rank), Some(created)) => (rank - created.as_secs() as f64).round() as i64,
            _ => 0,
        }
    }

    fn index(&self, ordering: OrderingKey) -> &SortedSet<PostId> {
        match ordering {
            OrderingKey::Time => &self.time_index,
            OrderingKey::Score => &self.score_index,
        }
    }
}

impl InMemoryVoteLedger {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LedgerState::default()),
        }
    }

    /// Check every post's Score Index entry against its recorded directions.
    pub fn verify_consistency(&self) -> Result<ConsistencyReport, LedgerError> {
        ConsistencyValidator::validate(self)
    }

    /// Hot rank as stored in the Score Index.
    pub fn hot_rank(&self, post: PostId) -> Result<Option<f64>, LedgerError> {
        Ok(self.read()?.score_index.score(&post))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.inner.read().map_err(|_| LedgerError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.inner.write().map_err(|_| LedgerError::LockPoisoned)
    }
}

impl Default for InMemoryVoteLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerWriter for InMemoryVoteLedger {
    fn create_post(
        &self,
        post: PostId,
        community: CommunityId,
        author: UserId,
        now: Timestamp,
    ) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        if state.created.contains_key(&post) {
            return Err(LedgerError::PostExists(post));
        }
        let voters = HashMap::from([(author, VoteDirection::Up)]);
        state.insert_post(post, community, author, now, voters);
        debug!(post_id = %post, community_id = %community, author_id = %author, "post created");
        Ok(())
    }

    fn submit_vote_stamped(
        &self,
        post: PostId,
        user: UserId,
        direction: VoteDirection,
        now: Timestamp,
        stamp: &dyn Fn() -> Timestamp,
    ) -> Result<VoteReceipt, LedgerError> {
        let mut state = self.write()?;

        let created = state.created.get(&post).copied().unwrap_or(Timestamp::EPOCH);
        if !is_within_window(created, now) {
            return Err(LedgerError::VoteWindowExpired { post, created, now });
        }

        let current = state
            .voters
            .get(&post)
            .and_then(|v| v.get(&user))
            .copied()
            .unwrap_or_default();
        let transition = apply_vote(current, direction);
        if transition.outcome == VoteOutcome::RejectedDuplicate {
            return Err(LedgerError::DuplicateVote {
                post,
                user,
                direction,
            });
        }

        state
            .voters
            .entry(post)
            .or_default()
            .insert(user, transition.new_direction);
        state.score_index.incr(post, transition.delta as f64);
        let score = state.score_of(post);
        let submitted_at = stamp();

        debug!(
            post_id = %post,
            user_id = %user,
            from = %current,
            to = %transition.new_direction,
            delta = transition.delta,
            score,
            "vote applied"
        );

        Ok(VoteReceipt {
            post_id: post,
            user_id: user,
            previous: current,
            direction: transition.new_direction,
            delta: transition.delta,
            score,
            submitted_at,
        })
    }

    fn restore_post(&self, snapshot: &PostSnapshot) -> Result<(), LedgerError> {
        let mut state = self.write()?;
        if state.created.contains_key(&snapshot.post_id) {
            return Err(LedgerError::PostExists(snapshot.post_id));
        }
        let mut voters = HashMap::from([(snapshot.author_id, VoteDirection::Up)]);
        voters.extend(snapshot.votes.iter().copied());
        state.insert_post(
            snapshot.post_id,
            snapshot.community_id,
            snapshot.author_id,
            snapshot.created_at,
            voters,
        );
        Ok(())
    }
}

impl LedgerReader for InMemoryVoteLedger {
    fn vote_count_for(&self, post: PostId) -> Result<i64, LedgerError> {
        let state = self.read()?;
        Ok(state
            .voters
            .get(&post)
            .map(|v| v.values().filter(|d| **d == VoteDirection::Up).count() as i64)
            .unwrap_or(0))
    }

    fn vote_counts_for(&self, posts: &[PostId]) -> Result<Vec<i64>, LedgerError> {
        let state = self.read()?;
        Ok(posts
            .iter()
            .map(|post| {
                state
                    .voters
                    .get(post)
                    .map(|v| v.values().filter(|d| **d == VoteDirection::Up).count() as i64)
                    .unwrap_or(0)
            })
            .collect())
    }

    fn score(&self, post: PostId) -> Result<i64, LedgerError> {
        Ok(self.read()?.score_of(post))
    }

    fn direction_of(&self, post: PostId, user: UserId) -> Result<VoteDirection, LedgerError> {
        let state = self.read()?;
        Ok(state
            .voters
            .get(&post)
            .and_then(|v| v.get(&user))
            .copied()
            .unwrap_or_default())
    }

    fn created_at(&self, post: PostId) -> Result<Option<Timestamp>, LedgerError> {
        Ok(self.read()?.created.get(&post).copied())
    }

    fn community_of(&self, post: PostId) -> Result<Option<CommunityId>, LedgerError> {
        Ok(self.read()?.post_community.get(&post).copied())
    }

    fn community_posts(&self, community: CommunityId) -> Result<Vec<PostId>, LedgerError> {
        let state = self.read()?;
        let mut posts: Vec<PostId> = state
            .communities
            .get(&community)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default();
        posts.sort_unstable();
        Ok(posts)
    }

    fn list_ordered(
        &self,
        ordering: OrderingKey,
        page: u64,
        size: u64,
    ) -> Result<Vec<PostId>, LedgerError> {
        let offset = page_offset(page, size)?;
        let limit = usize::try_from(size).unwrap_or(usize::MAX);
        Ok(self.read()?.index(ordering).rev_range(offset, limit))
    }

    fn community_ranking(
        &self,
        community: CommunityId,
        ordering: OrderingKey,
    ) -> Result<Vec<RankedEntry>, LedgerError> {
        let mut scored = {
            let state = self.read()?;
            match state.communities.get(&community) {
                Some(members) => state.index(ordering).scores_for(members),
                None => Vec::new(),
            }
        };

        for (_, score) in scored.iter_mut() {
            *score = Aggregate::Max.combine(MEMBERSHIP_WEIGHT, *score);
        }
        rank_descending(&mut scored);

        Ok(scored
            .into_iter()
            .map(|(post_id, rank)| RankedEntry { post_id, rank })
            .collect())
    }

    fn post_count(&self) -> Result<usize, LedgerError> {
        Ok(self.read()?.created.len())
    }

    fn post_ids(&self) -> Result<Vec<PostId>, LedgerError> {
        let mut ids: Vec<PostId> = self.read()?.created.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn snapshot(&self, post: PostId) -> Result<Option<PostSnapshot>, LedgerError> {
        let state = self.read()?;
        let (Some(created_at), Some(community_id), Some(author_id)) = (
            state.created.get(&post).copied(),
            state.post_community.get(&post).copied(),
            state.authors.get(&post).copied(),
        ) else {
            return Ok(None);
        };

        let mut votes: Vec<(UserId, VoteDirection)> = state
            .voters
            .get(&post)
            .map(|v| v.iter().map(|(u, d)| (*u, *d)).collect())
            .unwrap_or_default();
        votes.sort_unstable_by_key(|(u, _)| *u);

        Ok(Some(PostSnapshot {
            post_id: post,
            community_id,
            author_id,
            created_at,
            votes,
        }))
    }
}
