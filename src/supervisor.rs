/// Supervisor Module
///
/// Owns the indexer lifecycle: resuming from the persisted cursor, running the
/// scheduler, graceful shutdown, and the exit signal an embedding process (or a
/// health endpoint) watches to tell cancellation apart from failure.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::config::IndexerConfig;
use crate::cursor::Cursor;
use crate::db::EventRepository;
use crate::error::IndexerError;
use crate::etl::transform::EventDecoder;
use crate::pipeline::{BlockProcessor, PipelineStats};
use crate::rpc::LedgerClient;
use crate::scheduler::{Scheduler, SchedulerState};

/// Why the run loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Cancelled,
    Failed(String),
}

/// Snapshot for health reporting
#[derive(Debug, Clone)]
pub struct HealthReport {
    pub state: SchedulerState,
    pub next_height: u64,
    pub head_height: Option<u64>,
    /// Heights between the cursor and the ledger head
    pub lag: Option<u64>,
    pub last_error: Option<String>,
    pub consecutive_poll_failures: u32,
    pub stats: PipelineStats,
    pub exit: Option<ExitStatus>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        !matches!(self.exit, Some(ExitStatus::Failed(_)))
    }
}

pub struct Supervisor {
    config: IndexerConfig,
    ledger: Arc<dyn LedgerClient>,
    repository: Arc<dyn EventRepository>,
    cursor: Arc<Cursor>,
    scheduler: Scheduler,
    cancel: CancellationToken,
    started: AtomicBool,
    shutdown_requested: AtomicBool,
    exit: watch::Sender<Option<ExitStatus>>,
}

impl Supervisor {
    pub fn new(
        config: IndexerConfig,
        ledger: Arc<dyn LedgerClient>,
        repository: Arc<dyn EventRepository>,
        decoder: EventDecoder,
    ) -> Self {
        // Positioned by `resume` once the persisted cursor has been read
        let cursor = Arc::new(Cursor::new(0));
        let decoder = Arc::new(decoder.index_failed_transactions(config.index_failed_transactions));
        let processor = Arc::new(BlockProcessor::new(
            ledger.clone(),
            repository.clone(),
            decoder,
            Backoff::new(config.backoff_base, config.backoff_max),
            config.max_retry_attempts,
        ));
        let scheduler = Scheduler::new(config.clone(), ledger.clone(), repository.clone(), processor, cursor.clone());
        let (exit, _) = watch::channel(None);

        Self {
            config,
            ledger,
            repository,
            cursor,
            scheduler,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            shutdown_requested: AtomicBool::new(false),
            exit,
        }
    }

    /// Run the indexer until `shutdown` is called or an unrecoverable error occurs.
    ///
    /// Configuration problems are reported before the run loop is entered.
    /// A supervisor runs at most once.
    pub async fn start(&self) -> Result<(), IndexerError> {
        self.config.validate()?;

        if self.started.swap(true, Ordering::SeqCst) {
            return Err(IndexerError::AlreadyRunning);
        }

        if let Err(e) = self.resume().await {
            self.finish(Err(e.clone()));
            return Err(e);
        }

        tracing::info!(
            "Indexer '{}' starting at slot {} (batch {}, concurrency {})",
            self.config.indexer_id,
            self.cursor.get(),
            self.config.batch_size,
            self.config.max_concurrency
        );

        let result = self.scheduler.run(&self.cancel).await;
        self.finish(result.clone());
        result
    }

    /// Position the cursor: persisted cursor, else the configured start, else the ledger head.
    ///
    /// A persisted cursor always wins so a restart never skips heights. The
    /// configured start only seeds an indexer id that has never saved a cursor.
    async fn resume(&self) -> Result<(), IndexerError> {
        let start = match self.repository.load_cursor(&self.config.indexer_id).await? {
            Some(saved) => {
                if self.config.start_height.is_some_and(|start| start != saved) {
                    tracing::info!(
                        "Persisted cursor for '{}' takes precedence over the configured start slot",
                        self.config.indexer_id
                    );
                }
                tracing::info!("Resuming from persisted cursor at slot {}", saved);
                saved
            }
            None => match self.config.start_height {
                Some(start) => start,
                None => {
                    let head = self.ledger.current_height().await.map_err(|e| {
                        IndexerError::LedgerUnreachable { failures: 1, last_error: e.to_string() }
                    })?;
                    tracing::info!("No persisted cursor, starting at the ledger head {}", head);
                    head
                }
            },
        };

        self.cursor.advance(start)?;
        Ok(())
    }

    fn finish(&self, result: Result<(), IndexerError>) {
        let status = match result {
            Ok(()) => ExitStatus::Cancelled,
            Err(e) => {
                tracing::error!("Indexer stopped: {}", e);
                ExitStatus::Failed(e.to_string())
            }
        };
        self.exit.send_replace(Some(status));
    }

    /// Stop dispatching and wait for in-flight blocks, at most `shutdown_timeout`.
    /// Safe to call more than once, and before `start`.
    pub async fn shutdown(&self) -> Result<(), IndexerError> {
        if !self.shutdown_requested.swap(true, Ordering::SeqCst) {
            tracing::info!("Shutdown requested");
            self.cancel.cancel();
        }

        if !self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Already finished, possibly without ever entering the run loop
        if self.exit.borrow().is_some() {
            return Ok(());
        }

        let mut state = self.scheduler.subscribe();
        let stopped = state.wait_for(|s| *s == SchedulerState::Stopped);
        if tokio::time::timeout(self.config.shutdown_timeout, stopped).await.is_err() {
            tracing::warn!(
                "In-flight blocks did not finish within {:?}, shutting down anyway",
                self.config.shutdown_timeout
            );
        }

        Ok(())
    }

    /// Next height to be indexed; everything below it is durably saved
    pub fn current_height(&self) -> u64 {
        self.cursor.get()
    }

    pub fn exit_status(&self) -> watch::Receiver<Option<ExitStatus>> {
        self.exit.subscribe()
    }

    pub fn health(&self) -> HealthReport {
        let progress = self.scheduler.progress();
        let next_height = self.cursor.get();

        HealthReport {
            state: self.scheduler.state(),
            next_height,
            head_height: progress.head_height,
            lag: progress.head_height.map(|head| head.saturating_add(1).saturating_sub(next_height)),
            last_error: progress.last_error,
            consecutive_poll_failures: progress.consecutive_poll_failures,
            stats: progress.stats,
            exit: self.exit.borrow().clone(),
        }
    }
}
