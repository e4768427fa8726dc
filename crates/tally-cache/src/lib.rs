//! Ranking cache for Tally.
//!
//! Community listings are the structural intersection of a community's
//! membership set with one of the ledger's global orderings. That
//! intersection is computed once per `(ordering, community)` and kept as an
//! immutable [`Materialized`] list until its TTL runs out. The cache is
//! advisory: disabled or failing, it computes straight from the ledger and
//! returns the same answer.

pub mod cache;
pub mod error;

pub use cache::{CacheConfig, CacheStats, Materialized, RankingCache};
pub use error::{CacheError, CacheResult};
