/// Pipeline Module
///
/// Processes one height end to end: fetch → decode → save, with bounded
/// exponential backoff on transient errors and statistics tracking.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::db::EventRepository;
use crate::error::{LedgerError, ProcessError};
use crate::etl::transform::EventDecoder;
use crate::models::Block;
use crate::rpc::LedgerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Fetch,
    Save,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Fetch => write!(f, "Fetch"),
            PipelineStage::Save => write!(f, "Save"),
        }
    }
}

/// Successful result of processing one height
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Indexed { transactions: usize, events: usize, inserted: u64 },
    /// The ledger skipped this height; there is nothing to index
    Skipped,
}

/// Running totals reported through health introspection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub cycles: u64,
    pub heights_indexed: u64,
    pub heights_skipped: u64,
    pub heights_deferred: u64,
    pub heights_failed: u64,
    pub events_decoded: u64,
    pub events_inserted: u64,
}

impl PipelineStats {
    pub fn record(&mut self, result: &Result<BlockOutcome, ProcessError>) {
        match result {
            Ok(BlockOutcome::Indexed { events, inserted, .. }) => {
                self.heights_indexed += 1;
                self.events_decoded += *events as u64;
                self.events_inserted += inserted;
            }
            Ok(BlockOutcome::Skipped) => self.heights_skipped += 1,
            Err(e) if e.is_not_ready() => self.heights_deferred += 1,
            Err(_) => self.heights_failed += 1,
        }
    }
}

/// Retry bookkeeping for one stage of one height
#[derive(Debug, Clone)]
pub struct ProcessingAttempt {
    pub height: u64,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl ProcessingAttempt {
    fn new(height: u64) -> Self {
        Self { height, attempt_count: 0, last_error: None }
    }

    fn record_failure(&mut self, error: String) {
        self.attempt_count += 1;
        self.last_error = Some(error);
    }
}

/// How a failed attempt should be handled
enum Failure {
    Transient(String),
    Permanent(ProcessError),
}

/// Fetches, decodes and saves single heights. Cheap to share across workers.
pub struct BlockProcessor {
    ledger: Arc<dyn LedgerClient>,
    repository: Arc<dyn EventRepository>,
    decoder: Arc<EventDecoder>,
    backoff: Backoff,
    max_attempts: u32,
}

impl BlockProcessor {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        repository: Arc<dyn EventRepository>,
        decoder: Arc<EventDecoder>,
        backoff: Backoff,
        max_attempts: u32,
    ) -> Self {
        Self { ledger, repository, decoder, backoff, max_attempts: max_attempts.max(1) }
    }

    /// Process one height. The returned error is confined to this height.
    pub async fn process(&self, height: u64, cancel: &CancellationToken) -> Result<BlockOutcome, ProcessError> {
        let block = match self.fetch(height, cancel).await? {
            Some(block) => block,
            None => {
                tracing::debug!("Slot {} was skipped by the leader", height);
                return Ok(BlockOutcome::Skipped);
            }
        };

        let events = self.decoder.decode_block(&block);
        let inserted = if events.is_empty() {
            0
        } else {
            self.retry(height, PipelineStage::Save, cancel, || async {
                self.repository.save_events(&events).await.map_err(|e| {
                    if e.is_transient() {
                        Failure::Transient(e.to_string())
                    } else {
                        Failure::Permanent(ProcessError::Fatal {
                            height,
                            stage: PipelineStage::Save,
                            reason: e.to_string(),
                        })
                    }
                })
            })
            .await?
        };

        tracing::debug!(
            "Indexed slot {}: {} transactions, {} events ({} new)",
            height,
            block.transactions.len(),
            events.len(),
            inserted
        );

        Ok(BlockOutcome::Indexed { transactions: block.transactions.len(), events: events.len(), inserted })
    }

    /// `Ok(None)` means the ledger skipped the height
    async fn fetch(&self, height: u64, cancel: &CancellationToken) -> Result<Option<Block>, ProcessError> {
        self.retry(height, PipelineStage::Fetch, cancel, || async {
            match self.ledger.fetch_block(height).await {
                Ok(block) => Ok(Some(block)),
                Err(LedgerError::Skipped { .. }) => Ok(None),
                Err(LedgerError::NotFound { .. }) => Err(Failure::Permanent(ProcessError::NotReady { height })),
                Err(LedgerError::Transient(reason)) => Err(Failure::Transient(reason)),
                Err(LedgerError::Fatal(reason)) => {
                    Err(Failure::Permanent(ProcessError::Fatal { height, stage: PipelineStage::Fetch, reason }))
                }
            }
        })
        .await
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    /// Cancellation is honored between attempts only.
    async fn retry<T, F, Fut>(
        &self,
        height: u64,
        stage: PipelineStage,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ProcessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let mut attempt = ProcessingAttempt::new(height);

        loop {
            let reason = match op().await {
                Ok(value) => return Ok(value),
                Err(Failure::Permanent(err)) => return Err(err),
                Err(Failure::Transient(reason)) => reason,
            };
            attempt.record_failure(reason);

            if attempt.attempt_count >= self.max_attempts {
                return Err(ProcessError::RetriesExhausted {
                    height,
                    stage,
                    attempts: attempt.attempt_count,
                    last_error: attempt.last_error.unwrap_or_default(),
                });
            }

            let delay = self.backoff.delay(attempt.attempt_count - 1);
            tracing::warn!(
                "{} failed for slot {}, retrying in {:?} ({}/{}): {}",
                stage,
                attempt.height,
                delay,
                attempt.attempt_count,
                self.max_attempts,
                attempt.last_error.as_deref().unwrap_or_default()
            );

            if !sleep_unless_cancelled(delay, cancel).await {
                return Err(ProcessError::Cancelled { height, stage });
            }
        }
    }
}

/// Returns `false` if cancelled before the delay elapsed
pub(crate) async fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
