/// CLI Module
///
/// Command-line interface configuration using clap.
use clap::Parser;
use std::time::Duration;

use slot_event_indexer::IndexerConfig;

/// Solana Slot Event Indexer
///
/// Follow the chain, decode program events and store them in PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "slot-event-indexer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Starting slot when no cursor has been persisted (defaults to the latest slot).
    /// To re-index from an earlier slot, use a new --indexer-id.
    #[arg(short = 's', long, value_name = "SLOT")]
    pub start_slot: Option<u64>,

    /// RPC endpoint URL (overrides SOLANA_RPC_URL env var)
    #[arg(short = 'r', long, value_name = "URL")]
    pub rpc_url: Option<String>,

    /// Database connection URL (overrides DATABASE_URL env var)
    #[arg(short = 'd', long, value_name = "URL")]
    pub database_url: Option<String>,

    /// Keep events in memory instead of PostgreSQL (nothing is persisted)
    #[arg(long, conflicts_with = "database_url")]
    pub memory: bool,

    /// Name under which the cursor is persisted
    #[arg(long, value_name = "ID", default_value = "default")]
    pub indexer_id: String,

    /// Maximum slots per scheduling window
    #[arg(short = 'b', long, value_name = "SIZE", default_value = "10")]
    pub batch_size: usize,

    /// Maximum blocks processed concurrently
    #[arg(short = 'c', long, value_name = "COUNT", default_value = "5")]
    pub max_concurrency: usize,

    /// Maximum attempts per fetch or save
    #[arg(long, value_name = "COUNT", default_value = "5")]
    pub max_retries: u32,

    /// Base retry delay in milliseconds
    #[arg(long, value_name = "MS", default_value = "200")]
    pub backoff_base_ms: u64,

    /// Maximum retry delay in milliseconds
    #[arg(long, value_name = "MS", default_value = "10000")]
    pub backoff_max_ms: u64,

    /// Interval between head polls in milliseconds
    #[arg(long, value_name = "MS", default_value = "1000")]
    pub interval_ms: u64,

    /// Seconds to wait for in-flight blocks on shutdown
    #[arg(long, value_name = "SECONDS", default_value = "30")]
    pub shutdown_timeout: u64,

    /// Stop after this many consecutive failed head polls
    #[arg(long, value_name = "COUNT")]
    pub max_poll_failures: Option<u32>,

    /// Also decode transactions that failed on chain
    #[arg(long)]
    pub include_failed: bool,
}

impl Cli {
    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            anyhow::bail!("Batch size must be greater than 0");
        }

        if self.max_concurrency == 0 {
            anyhow::bail!("Max concurrency must be greater than 0");
        }

        if self.max_retries == 0 {
            anyhow::bail!("Max retries must be greater than 0");
        }

        if self.backoff_base_ms > self.backoff_max_ms {
            anyhow::bail!(
                "Backoff base ({} ms) must be less than or equal to backoff max ({} ms)",
                self.backoff_base_ms,
                self.backoff_max_ms
            );
        }

        Ok(())
    }

    /// Build the indexer configuration
    pub fn into_config(self) -> IndexerConfig {
        IndexerConfig {
            indexer_id: self.indexer_id,
            start_height: self.start_slot,
            poll_interval: Duration::from_millis(self.interval_ms),
            batch_size: self.batch_size,
            max_concurrency: self.max_concurrency,
            max_retry_attempts: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_base_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout),
            max_poll_failures: self.max_poll_failures,
            index_failed_transactions: self.include_failed,
        }
    }
}
