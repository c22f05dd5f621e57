/// Configuration Module
///
/// Runtime settings for the indexing pipeline. Loading them (CLI flags,
/// environment) is the binary's job; the library only validates.
use std::time::Duration;

use crate::error::IndexerError;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Key under which the cursor is persisted
    pub indexer_id: String,
    /// Height to start from when no cursor has been persisted; `None` starts at the ledger head.
    /// A persisted cursor always wins, so restarts never skip heights.
    pub start_height: Option<u64>,
    pub poll_interval: Duration,
    /// Maximum heights per scheduling window
    pub batch_size: usize,
    /// Maximum blocks processed at the same time
    pub max_concurrency: usize,
    /// Total attempts per fetch or save, including the first one
    pub max_retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Upper bound on how long shutdown waits for in-flight blocks
    pub shutdown_timeout: Duration,
    /// Consecutive head-poll failures tolerated before giving up; `None` never gives up
    pub max_poll_failures: Option<u32>,
    pub index_failed_transactions: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            indexer_id: "default".to_string(),
            start_height: None,
            poll_interval: Duration::from_millis(1000),
            batch_size: 10,
            max_concurrency: 5,
            max_retry_attempts: 5,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(30),
            max_poll_failures: None,
            index_failed_transactions: false,
        }
    }
}

impl IndexerConfig {
    /// Check the invariants the run loop relies on
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.indexer_id.trim().is_empty() {
            return Err(IndexerError::Config("indexer_id must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be greater than 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(IndexerError::Config("max_concurrency must be greater than 0".into()));
        }
        if self.max_retry_attempts == 0 {
            return Err(IndexerError::Config("max_retry_attempts must be greater than 0".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(IndexerError::Config("poll_interval must be greater than 0".into()));
        }
        if self.backoff_base > self.backoff_max {
            return Err(IndexerError::Config(format!(
                "backoff_base ({:?}) must not exceed backoff_max ({:?})",
                self.backoff_base, self.backoff_max
            )));
        }
        if self.max_poll_failures == Some(0) {
            return Err(IndexerError::Config("max_poll_failures must be greater than 0 when set".into()));
        }

        Ok(())
    }
}
