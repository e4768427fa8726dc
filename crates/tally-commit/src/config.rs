use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Batch committer settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Deliveries per transaction; also the queue depth that triggers an
    /// early drain.
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    /// Deliveries of an undecodable event before it is dropped.
    pub max_attempts: u32,
    /// Lifetime of an acknowledgment flag.
    pub ack_ttl_secs: u64,
    /// Pause after a failed transaction.
    pub retry_backoff_ms: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_interval_ms: 5_000,
            max_attempts: 5,
            ack_ttl_secs: 24 * 3600,
            retry_backoff_ms: 1_000,
        }
    }
}

impl CommitConfig {
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    pub fn ack_ttl(&self) -> Duration {
        Duration::from_secs(self.ack_ttl_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
