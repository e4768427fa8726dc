use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;

/// How scores combine when the same member appears in both inputs of an
/// intersection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Aggregate {
    #[default]
    Max,
    Min,
    Sum,
}

impl Aggregate {
    pub fn combine(self, a: f64, b: f64) -> f64 {
        match self {
            Self::Max => a.max(b),
            Self::Min => a.min(b),
            Self::Sum => a + b,
        }
    }
}

/// `f64` with a total order, so it can key a `BTreeSet`.
#[derive(Clone, Copy, Debug)]
struct OrdScore(f64);

impl PartialEq for OrdScore {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for OrdScore {}

impl PartialOrd for OrdScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Ordered set of members keyed by a floating-point score.
///
/// Point lookups go through a hash map; ordered range reads walk a
/// `BTreeSet<(score, member)>`. Ties on score order by member, so iteration
/// order is deterministic. Descending reads therefore return equal-score
/// members in descending member order.
#[derive(Clone, Debug)]
pub struct SortedSet<M> {
    scores: HashMap<M, f64>,
    ordered: BTreeSet<(OrdScore, M)>,
}

impl<M> Default for SortedSet<M> {
    fn default() -> Self {
        Self {
            scores: HashMap::new(),
            ordered: BTreeSet::new(),
        }
    }
}

impl<M: Copy + Ord + Hash> SortedSet<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn score(&self, member: &M) -> Option<f64> {
        self.scores.get(member).copied()
    }

    /// Set a member's score, returning the previous one.
    pub fn insert(&mut self, member: M, score: f64) -> Option<f64> {
        let previous = self.scores.insert(member, score);
        if let Some(old) = previous {
            self.ordered.remove(&(OrdScore(old), member));
        }
        self.ordered.insert((OrdScore(score), member));
        previous
    }

    /// Add `delta` to a member's score (absent members start at zero) and
    /// return the new score.
    pub fn incr(&mut self, member: M, delta: f64) -> f64 {
        let next = self.score(&member).unwrap_or(0.0) + delta;
        self.insert(member, next);
        next
    }

    /// Up to `limit` members, highest score first, skipping the first `offset`.
    pub fn rev_range(&self, offset: usize, limit: usize) -> Vec<M> {
        self.ordered
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .map(|(_, m)| *m)
            .collect()
    }

    /// Intersect with a plain member set whose members all carry `weight`,
    /// combining scores with `aggregate`. The result is sorted highest first,
    /// with the same tie order as [`Self::rev_range`].
    ///
    /// Only the per-member lookup runs against `self`; callers that hold a
    /// lock can collect with [`Self::scores_for`] and finish with
    /// [`rank_descending`] after releasing it.
    pub fn intersect(&self, members: &HashSet<M>, weight: f64, aggregate: Aggregate) -> Vec<(M, f64)> {
        let mut out: Vec<(M, f64)> = self
            .scores_for(members)
            .into_iter()
            .map(|(m, s)| (m, aggregate.combine(weight, s)))
            .collect();
        rank_descending(&mut out);
        out
    }

    /// Scores of the given members that are present in this set, unordered.
    pub fn scores_for<'a, I>(&self, members: I) -> Vec<(M, f64)>
    where
        I: IntoIterator<Item = &'a M>,
        M: 'a,
    {
        members
            .into_iter()
            .filter_map(|m| self.scores.get(m).map(|s| (*m, *s)))
            .collect()
    }
}

/// Sort `(member, score)` pairs highest score first, ties by member
/// descending.
pub fn rank_descending<M: Ord>(entries: &mut [(M, f64)]) {
    entries.sort_by(|(ma, sa), (mb, sb)| sb.total_cmp(sa).then_with(|| mb.cmp(ma)));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(entries: &[(u64, f64)]) -> SortedSet<u64> {
        let mut s = SortedSet::new();
        for (m, score) in entries {
            s.insert(*m, *score);
        }
        s
    }

    #[test]
    fn insert_replaces_score() {
        let mut s = SortedSet::new();
        assert_eq!(s.insert(1u64, 5.0), None);
        assert_eq!(s.insert(1u64, 9.0), Some(5.0));
        assert_eq!(s.len(), 1);
        assert_eq!(s.score(&1), Some(9.0));
        assert_eq!(s.rev_range(0, 10), vec![1]);
    }

    #[test]
    fn incr_creates_and_moves() {
        let mut s = set(&[(1, 10.0), (2, 20.0)]);
        assert_eq!(s.incr(1, 15.0), 25.0);
        assert_eq!(s.incr(3, -1.0), -1.0);
        assert_eq!(s.rev_range(0, 10), vec![1, 2, 3]);
    }

    #[test]
    fn rev_range_paginates() {
        let s = set(&[(1, 1.0), (2, 2.0), (3, 3.0), (4, 4.0), (5, 5.0)]);
        assert_eq!(s.rev_range(0, 2), vec![5, 4]);
        assert_eq!(s.rev_range(2, 2), vec![3, 2]);
        assert_eq!(s.rev_range(4, 2), vec![1]);
        assert!(s.rev_range(5, 2).is_empty());
    }

    #[test]
    fn ties_break_by_member_descending() {
        let s = set(&[(1, 7.0), (3, 7.0), (2, 7.0)]);
        assert_eq!(s.rev_range(0, 3), vec![3, 2, 1]);
    }

    #[test]
    fn intersect_max_keeps_index_score() {
        let s = set(&[(1, 100.0), (2, 300.0), (3, 200.0), (4, 50.0)]);
        let members: HashSet<u64> = [1, 3, 9].into_iter().collect();
        let out = s.intersect(&members, 1.0, Aggregate::Max);
        assert_eq!(out, vec![(3, 200.0), (1, 100.0)]);
    }

    #[test]
    fn intersect_sum_double_counts_weight() {
        let s = set(&[(1, 100.0)]);
        let members: HashSet<u64> = [1].into_iter().collect();
        assert_eq!(s.intersect(&members, 1.0, Aggregate::Sum), vec![(1, 101.0)]);
        assert_eq!(s.intersect(&members, 1.0, Aggregate::Min), vec![(1, 1.0)]);
    }

    #[test]
    fn intersect_order_matches_rev_range() {
        let s = set(&[(1, 5.0), (2, 5.0), (3, 1.0), (4, 9.0)]);
        let all: HashSet<u64> = [1, 2, 3, 4].into_iter().collect();
        let ids: Vec<u64> = s
            .intersect(&all, f64::MIN, Aggregate::Max)
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(ids, s.rev_range(0, 10));
    }
}
