//! Vote ingestion and ranking engine for Tally.
//!
//! [`Engine`] is the entry point for embedding applications. It owns the
//! vote ledger, ranking cache, intake queue, id generator and the background
//! batch committer, and exposes the operations a forum gateway calls:
//! submitting votes, creating posts and serving ranked listings.
//!
//! Nothing here is global. Every engine is built explicitly from an
//! [`EngineConfig`] and shut down explicitly.

pub mod config;
pub mod engine;
pub mod error;
pub mod idgen;

pub use config::{EngineConfig, IntakeConfig};
pub use engine::{
    Engine, EngineBuilder, ListQuery, NewPost, PostListing, PostView, RankedPage, VoteAccepted,
    VoteStatus,
};
pub use error::{EngineError, EngineResult, RejectReason};
pub use idgen::{IdGenerator, SnowflakeGenerator};

pub use tally_cache::CacheConfig;
pub use tally_commit::{CommitConfig, CommitStats};
pub use tally_types::{CommunityId, OrderingKey, PostId, Timestamp, UserId, VoteDirection};
