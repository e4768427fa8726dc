//! The scoring model: pure functions, no state.
//!
//! Scores move by a constant weight per unit of direction change, so the
//! running Score Index value can be maintained with a single increment per
//! vote instead of a recount.

use std::time::Duration;

use tally_types::{Timestamp, VoteDirection};

/// Score contributed by one unit of vote direction.
pub const VOTE_WEIGHT: i64 = 432;

/// How long after creation a post accepts votes.
pub const VOTE_WINDOW: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoteOutcome {
    Accepted,
    RejectedDuplicate,
}

/// Result of applying a requested direction on top of the current one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScoreTransition {
    pub delta: i64,
    pub new_direction: VoteDirection,
    pub outcome: VoteOutcome,
}

pub fn apply_vote(current: VoteDirection, requested: VoteDirection) -> ScoreTransition {
    if requested == current {
        return ScoreTransition {
            delta: 0,
            new_direction: current,
            outcome: VoteOutcome::RejectedDuplicate,
        };
    }

    ScoreTransition {
        delta: VOTE_WEIGHT * (requested.value() - current.value()),
        new_direction: requested,
        outcome: VoteOutcome::Accepted,
    }
}

/// `true` while `now - created <= VOTE_WINDOW`.
pub fn is_within_window(created: Timestamp, now: Timestamp) -> bool {
    now.since(created) <= VOTE_WINDOW
}

/// Score Index value for a post: creation seconds plus vote score.
///
/// Newer posts start higher; each net upvote is worth [`VOTE_WEIGHT`]
/// seconds of recency.
pub fn hot_rank(created: Timestamp, vote_score: i64) -> f64 {
    created.as_secs() as f64 + vote_score as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_types::VoteDirection::{Down, Neutral, Up};

    #[test]
    fn same_direction_is_duplicate() {
        for d in [Down, Neutral, Up] {
            let t = apply_vote(d, d);
            assert_eq!(t.outcome, VoteOutcome::RejectedDuplicate);
            assert_eq!(t.delta, 0);
            assert_eq!(t.new_direction, d);
        }
    }

    #[test]
    fn transitions_use_constant_weight() {
        assert_eq!(apply_vote(Neutral, Up).delta, 432);
        assert_eq!(apply_vote(Neutral, Down).delta, -432);
        assert_eq!(apply_vote(Up, Down).delta, -864);
        assert_eq!(apply_vote(Down, Up).delta, 864);
        assert_eq!(apply_vote(Up, Neutral).delta, -432);
        assert_eq!(apply_vote(Down, Neutral).delta, 432);
    }

    #[test]
    fn accepted_transition_takes_requested_direction() {
        let t = apply_vote(Up, Neutral);
        assert_eq!(t.outcome, VoteOutcome::Accepted);
        assert_eq!(t.new_direction, Neutral);
    }

    #[test]
    fn window_boundaries() {
        let created = Timestamp::from_secs(1_700_000_000);
        let window = VOTE_WINDOW.as_secs();

        let inside = Timestamp::from_secs(1_700_000_000 + window - 1);
        let edge = Timestamp::from_secs(1_700_000_000 + window);
        let outside = Timestamp::from_secs(1_700_000_000 + window + 1);

        assert!(is_within_window(created, inside));
        assert!(is_within_window(created, edge));
        assert!(!is_within_window(created, outside));
    }

    #[test]
    fn clock_skew_before_creation_is_within_window() {
        let created = Timestamp::from_secs(100);
        assert!(is_within_window(created, Timestamp::from_secs(50)));
    }

    #[test]
    fn hot_rank_adds_score_to_creation_seconds() {
        let created = Timestamp::from_millis(1_000_999);
        assert_eq!(hot_rank(created, 432), 1_000.0 + 432.0);
        assert_eq!(hot_rank(created, -864), 1_000.0 - 864.0);
    }
}
