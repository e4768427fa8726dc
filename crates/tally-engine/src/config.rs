use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_cache::CacheConfig;
use tally_commit::CommitConfig;
use tally_intake::{QueueConfig, RetryPolicy};

use crate::error::{EngineError, EngineResult};
use crate::idgen::MAX_NODE_ID;

/// Intake queue and producer retry settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntakeConfig {
    pub capacity: usize,
    pub wal_path: Option<PathBuf>,
    pub sync_every_write: bool,
    pub enqueue_retries: u32,
    pub enqueue_backoff_ms: u64,
    pub enqueue_timeout_ms: u64,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            wal_path: None,
            sync_every_write: false,
            enqueue_retries: 3,
            enqueue_backoff_ms: 10,
            enqueue_timeout_ms: 2_000,
        }
    }
}

impl IntakeConfig {
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            capacity: self.capacity,
            wal_path: self.wal_path.clone(),
            sync_every_write: self.sync_every_write,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.enqueue_backoff_ms);
        RetryPolicy {
            max_retries: self.enqueue_retries,
            base_backoff: base,
            max_backoff: base.saturating_mul(32),
            timeout: Duration::from_millis(self.enqueue_timeout_ms),
        }
    }
}

/// Top-level engine configuration, loadable from TOML.
///
/// ```toml
/// node_id = 1
///
/// [cache]
/// ttl_secs = 60
///
/// [intake]
/// capacity = 10000
/// wal_path = "/var/lib/tally/intake.wal"
///
/// [commit]
/// batch_size = 100
/// batch_interval_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Distinguishes id generators running side by side.
    pub node_id: u16,
    pub cache: CacheConfig,
    pub intake: IntakeConfig,
    pub commit: CommitConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            cache: CacheConfig::default(),
            intake: IntakeConfig::default(),
            commit: CommitConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(text: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> EngineResult<String> {
        toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.node_id > MAX_NODE_ID {
            return Err(EngineError::Config(format!(
                "node_id {} exceeds {MAX_NODE_ID}",
                self.node_id
            )));
        }
        let zero = [
            ("intake.capacity", self.intake.capacity as u64),
            ("intake.enqueue_timeout_ms", self.intake.enqueue_timeout_ms),
            ("commit.batch_size", self.commit.batch_size as u64),
            ("commit.batch_interval_ms", self.commit.batch_interval_ms),
            ("commit.max_attempts", u64::from(self.commit.max_attempts)),
        ]
        .into_iter()
        .find(|(_, v)| *v == 0);
        if let Some((name, _)) = zero {
            return Err(EngineError::Config(format!("{name} must be greater than zero")));
        }
        Ok(())
    }
}
