use tally_types::PostId;

use crate::error::LedgerError;
use crate::scoring::VOTE_WEIGHT;
use crate::traits::LedgerReader;

/// Result of a ledger consistency pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub posts_checked: usize,
    pub violations: Vec<Violation>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.violations.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub post_id: PostId,
    pub kind: ViolationKind,
    pub description: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationKind {
    /// Score Index disagrees with `VOTE_WEIGHT × Σ directions`.
    ScoreDrift,
    /// Post is not listed under its own community.
    MissingMembership,
    /// Up count disagrees with the recorded directions.
    CountMismatch,
}

/// Cross-checks the derived projections against recorded directions.
pub struct ConsistencyValidator;

impl ConsistencyValidator {
    pub fn validate<R: LedgerReader + ?Sized>(
        reader: &R,
    ) -> Result<ConsistencyReport, LedgerError> {
        let mut report = ConsistencyReport::default();

        for post in reader.post_ids()? {
            // Post vanished between listing and reading; nothing to check.
            let Some(snapshot) = reader.snapshot(post)? else {
                continue;
            };
            report.posts_checked += 1;

            let sum: i64 = snapshot.votes.iter().map(|(_, d)| d.value()).sum();
            let expected = VOTE_WEIGHT * sum;
            let actual = reader.score(post)?;
            if actual != expected {
                report.violations.push(Violation {
                    post_id: post,
                    kind: ViolationKind::ScoreDrift,
                    description: format!("expected score {expected}, index holds {actual}"),
                });
            }

            let ups = snapshot.votes.iter().filter(|(_, d)| d.value() > 0).count() as i64;
            let counted = reader.vote_count_for(post)?;
            if ups != counted {
                report.violations.push(Violation {
                    post_id: post,
                    kind: ViolationKind::CountMismatch,
                    description: format!("{ups} up records, count reports {counted}"),
                });
            }

            if !reader
                .community_posts(snapshot.community_id)?
                .contains(&post)
            {
                report.violations.push(Violation {
                    post_id: post,
                    kind: ViolationKind::MissingMembership,
                    description: format!("not a member of community {}", snapshot.community_id),
                });
            }
        }

        Ok(report)
    }
}
