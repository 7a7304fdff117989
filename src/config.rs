//! Engine configuration.

use crate::error::{Result, SyncError};
use crate::query::MAX_YEAR_SPAN;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Well-known key under which the sync queue is persisted.
pub const DEFAULT_QUEUE_KEY: &str = "contact_sync_queue";

/// Sync engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Directory holding local durable state (the sync queue).
    pub data_dir: PathBuf,

    /// Key the sync queue is stored under.
    pub queue_key: String,

    /// Whether to create `data_dir` if it doesn't exist.
    pub create_if_missing: bool,

    /// Max partitions fetched in parallel by global queries.
    pub fetch_concurrency: usize,

    /// Years before the current one probed by global queries.
    pub years_back: i32,

    /// Years after the current one probed by global queries.
    pub years_forward: i32,

    /// Max buffered working-set events per subscriber.
    pub subscriber_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./contact-sync"),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
            create_if_missing: true,
            fetch_concurrency: 4,
            years_back: 2,
            years_forward: 1,
            subscriber_buffer: 64,
        }
    }
}

impl SyncConfig {
    /// Config rooted at `data_dir` with defaults for everything else.
    pub fn at(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.queue_key.trim().is_empty() {
            return Err(SyncError::InvalidConfig("queue_key is empty".into()));
        }
        if self.fetch_concurrency == 0 {
            return Err(SyncError::InvalidConfig("fetch_concurrency must be > 0".into()));
        }
        if self.years_back < 0 || self.years_forward < 0 {
            return Err(SyncError::InvalidConfig("year window must not be negative".into()));
        }
        let span = i64::from(self.years_back) + i64::from(self.years_forward) + 1;
        if span > i64::from(MAX_YEAR_SPAN) {
            return Err(SyncError::InvalidConfig(format!(
                "year window spans {} years, more than {}",
                span, MAX_YEAR_SPAN
            )));
        }
        if self.subscriber_buffer == 0 {
            return Err(SyncError::InvalidConfig("subscriber_buffer must be > 0".into()));
        }
        Ok(())
    }
}
