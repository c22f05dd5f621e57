/// Scheduler Module
///
/// Drives the poll → dispatch → await → advance cycle. Heights inside a window
/// are processed concurrently by a bounded worker pool; the cursor only moves
/// over the contiguous prefix of successful heights, in ascending order.
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::IndexerConfig;
use crate::cursor::Cursor;
use crate::db::EventRepository;
use crate::error::{IndexerError, ProcessError};
use crate::pipeline::{sleep_unless_cancelled, BlockOutcome, BlockProcessor, PipelineStats};
use crate::rpc::LedgerClient;

/// Outcome per dispatched height, ordered by height
pub type HeightResults = BTreeMap<u64, Result<BlockOutcome, ProcessError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Polling,
    Dispatching,
    AwaitingCompletion,
    Advancing,
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SchedulerState::Idle => "idle",
            SchedulerState::Polling => "polling",
            SchedulerState::Dispatching => "dispatching",
            SchedulerState::AwaitingCompletion => "awaiting-completion",
            SchedulerState::Advancing => "advancing",
            SchedulerState::ShuttingDown => "shutting-down",
            SchedulerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What the scheduler has observed so far
#[derive(Debug, Clone, Default)]
pub struct Progress {
    /// Latest head height reported by the ledger
    pub head_height: Option<u64>,
    /// Most recent failure that held the cursor back, if the cursor has not moved since
    pub last_error: Option<String>,
    pub consecutive_poll_failures: u32,
    pub stats: PipelineStats,
}

/// Heights to process this cycle: `[next_height, min(head, next_height + batch_size - 1)]`
pub fn window(next_height: u64, head_height: u64, batch_size: usize) -> Option<RangeInclusive<u64>> {
    if next_height > head_height || batch_size == 0 {
        return None;
    }
    let end = head_height.min(next_height.saturating_add(batch_size as u64 - 1));
    Some(next_height..=end)
}

/// First height at or after `start` without a successful result
pub fn contiguous_end(start: u64, results: &HeightResults) -> u64 {
    let mut next = start;
    while let Some(Ok(_)) = results.get(&next) {
        next += 1;
    }
    next
}

pub struct Scheduler {
    config: IndexerConfig,
    ledger: Arc<dyn LedgerClient>,
    repository: Arc<dyn EventRepository>,
    processor: Arc<BlockProcessor>,
    cursor: Arc<Cursor>,
    state: watch::Sender<SchedulerState>,
    progress: Mutex<Progress>,
}

impl Scheduler {
    pub fn new(
        config: IndexerConfig,
        ledger: Arc<dyn LedgerClient>,
        repository: Arc<dyn EventRepository>,
        processor: Arc<BlockProcessor>,
        cursor: Arc<Cursor>,
    ) -> Self {
        let (state, _) = watch::channel(SchedulerState::Idle);
        Self { config, ledger, repository, processor, cursor, state, progress: Mutex::new(Progress::default()) }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.subscribe()
    }

    pub fn progress(&self) -> Progress {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_state(&self, state: SchedulerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!("Scheduler state {} -> {}", previous, state);
        }
    }

    fn update_progress(&self, f: impl FnOnce(&mut Progress)) {
        f(&mut self.progress.lock().unwrap_or_else(PoisonError::into_inner));
    }

    /// Run cycles until cancelled or the ledger is given up on.
    /// The state is `Stopped` when this returns, whatever the outcome.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), IndexerError> {
        let result = self.run_cycles(cancel).await;

        self.set_state(SchedulerState::ShuttingDown);
        tracing::info!("Scheduler stopped with cursor at {}", self.cursor.get());
        self.set_state(SchedulerState::Stopped);

        result
    }

    async fn run_cycles(&self, cancel: &CancellationToken) -> Result<(), IndexerError> {
        while !cancel.is_cancelled() {
            self.set_state(SchedulerState::Polling);

            let head_height = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                head = self.ledger.current_height() => head,
            };

            let head_height = match head_height {
                Ok(head) => {
                    self.update_progress(|p| {
                        p.head_height = Some(head);
                        p.consecutive_poll_failures = 0;
                    });
                    head
                }
                Err(e) => {
                    self.record_poll_failure(e.to_string())?;
                    self.set_state(SchedulerState::Idle);
                    sleep_unless_cancelled(self.config.poll_interval, cancel).await;
                    continue;
                }
            };

            let next_height = self.cursor.get();
            if let Some(heights) = window(next_height, head_height, self.config.batch_size) {
                self.set_state(SchedulerState::Dispatching);
                let results = self.dispatch(heights, cancel).await;

                self.set_state(SchedulerState::Advancing);
                self.advance(next_height, &results).await?;
            } else {
                tracing::debug!("Caught up at slot {} (head {})", next_height, head_height);
            }

            self.set_state(SchedulerState::Idle);
            sleep_unless_cancelled(self.config.poll_interval, cancel).await;
        }

        Ok(())
    }

    fn record_poll_failure(&self, error: String) -> Result<(), IndexerError> {
        let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
        progress.consecutive_poll_failures += 1;
        let failures = progress.consecutive_poll_failures;

        tracing::warn!("Failed to poll ledger head ({} in a row): {}", failures, error);

        if self.config.max_poll_failures.is_some_and(|limit| failures >= limit) {
            tracing::error!("Giving up on the ledger after {} consecutive poll failures", failures);
            return Err(IndexerError::LedgerUnreachable { failures, last_error: error });
        }

        progress.last_error = Some(error);
        Ok(())
    }

    /// Process every height of the window with at most `max_concurrency` in flight.
    /// Heights not dispatched because of cancellation have no entry in the result.
    async fn dispatch(&self, heights: RangeInclusive<u64>, cancel: &CancellationToken) -> HeightResults {
        tracing::info!(
            "Processing slots {} to {} ({} blocks)",
            heights.start(),
            heights.end(),
            heights.end() - heights.start() + 1
        );

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let mut workers = JoinSet::new();

        for height in heights {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Cancellation requested, not dispatching slot {} or later", height);
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let processor = self.processor.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                let _permit = permit;
                (height, processor.process(height, &cancel).await)
            });
        }

        self.set_state(SchedulerState::AwaitingCompletion);

        let mut results = HeightResults::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((height, result)) => {
                    results.insert(height, result);
                }
                Err(e) => tracing::error!("Block worker terminated abnormally: {}", e),
            }
        }

        results
    }

    async fn advance(&self, start: u64, results: &HeightResults) -> Result<(), IndexerError> {
        for err in results.values().filter_map(|result| result.as_ref().err()) {
            match err {
                ProcessError::NotReady { .. } => tracing::debug!("Slot {} not available yet, deferring", err.height()),
                ProcessError::Cancelled { .. } => tracing::debug!("Slot {} abandoned on shutdown", err.height()),
                _ => tracing::error!("Slot {} failed, will retry next cycle: {}", err.height(), err),
            }
        }

        let next = contiguous_end(start, results);
        let blocking_error = match results.get(&next) {
            Some(Err(e)) if !matches!(e, ProcessError::NotReady { .. } | ProcessError::Cancelled { .. }) => {
                Some(e.to_string())
            }
            _ => None,
        };

        self.update_progress(|p| {
            p.stats.cycles += 1;
            for result in results.values() {
                p.stats.record(result);
            }
            if next > start || blocking_error.is_some() {
                p.last_error = blocking_error;
            }
        });

        if next == start {
            return Ok(());
        }

        self.cursor.advance(next)?;
        tracing::info!("Cursor advanced to slot {} ({} blocks indexed)", next, next - start);

        if let Err(e) = self.repository.save_cursor(&self.config.indexer_id, next).await {
            tracing::warn!("Failed to persist cursor at slot {}: {}", next, e);
        }

        Ok(())
    }
}
