use thiserror::Error;

/// Errors produced by type conversions and event decoding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid vote direction: {0} (expected -1, 0 or 1)")]
    InvalidDirection(i64),

    #[error("invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("unknown ordering key: {0:?} (expected \"time\" or \"score\")")]
    InvalidOrdering(String),

    #[error("malformed intake event: {0}")]
    MalformedEvent(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
