use async_trait::async_trait;
use chrono::Utc;
use slot_event_indexer::error::LedgerError;
use slot_event_indexer::etl::layout::LayoutReader;
use slot_event_indexer::models::Payload;
use slot_event_indexer::{
    Block, DecodeError, EventDecoder, EventRepository, ExitStatus, IndexerConfig, IndexerError, InMemoryRepository,
    Instruction, InstructionDecoder, LedgerClient, SchedulerState, Supervisor, Transaction,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

const TRANSFER_PROGRAM: &str = "Transfer1111111111111111111111111111111111";

/// Ledger double with a fixed head, scripted per-height failures and
/// instrumentation of fetch timing and concurrency.
#[derive(Default)]
struct MockLedger {
    head: AtomicU64,
    failures: Mutex<HashMap<u64, VecDeque<LedgerError>>>,
    fetch_delay: Duration,
    fetches: Mutex<Vec<(u64, Instant)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockLedger {
    fn with_head(head: u64) -> Self {
        Self { head: AtomicU64::new(head), ..Default::default() }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    fn fail(self, height: u64, errors: impl IntoIterator<Item = LedgerError>) -> Self {
        self.failures.lock().unwrap().entry(height).or_default().extend(errors);
        self
    }

    fn fetch_times(&self, height: u64) -> Vec<Instant> {
        self.fetches.lock().unwrap().iter().filter(|(h, _)| *h == height).map(|(_, t)| *t).collect()
    }

    fn fetched_heights(&self) -> Vec<u64> {
        let mut heights: Vec<u64> = self.fetches.lock().unwrap().iter().map(|(h, _)| *h).collect();
        heights.sort_unstable();
        heights.dedup();
        heights
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn current_height(&self) -> Result<u64, LedgerError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn fetch_block(&self, height: u64) -> Result<Block, LedgerError> {
        self.fetches.lock().unwrap().push((height, Instant::now()));
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        if !self.fetch_delay.is_zero() {
            tokio::time::sleep(self.fetch_delay).await;
        }

        let scripted = self.failures.lock().unwrap().get_mut(&height).and_then(VecDeque::pop_front);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match scripted {
            Some(err) => Err(err),
            None => Ok(block(height)),
        }
    }
}

/// One transaction per block: a transfer instruction plus a log line
/// announcing the same transfer.
fn block(height: u64) -> Block {
    let mut raw_data = vec![0x01, 0x02];
    raw_data.extend_from_slice(&(height * 10).to_le_bytes());

    Block {
        height,
        hash: format!("hash-{height}"),
        parent_hash: format!("hash-{}", height - 1),
        parent_height: height - 1,
        timestamp: Utc::now(),
        transactions: vec![Transaction {
            signature: format!("sig-{height}"),
            instructions: vec![Instruction {
                program_id: TRANSFER_PROGRAM.into(),
                raw_data,
                accounts: vec!["alice".into(), "bob".into()],
            }],
            log_lines: vec![
                format!("Program {TRANSFER_PROGRAM} invoke [1]"),
                format!("Program log: Event: Transfer amount={} source=log", height * 10),
                format!("Program {TRANSFER_PROGRAM} success"),
            ],
            success: true,
        }],
    }
}

fn decoder() -> EventDecoder {
    let mut decoder = EventDecoder::with_builtin_decoders().unwrap();
    decoder.register_instruction(InstructionDecoder::new(
        Some(TRANSFER_PROGRAM),
        [0x01, 0x02],
        "Transfer",
        Arc::new(|reader: &mut LayoutReader<'_>, ix: &Instruction| -> Result<Payload, DecodeError> {
            let mut payload = Payload::new();
            payload.insert("amount".into(), reader.read_u64()?.into());
            payload.insert("from".into(), ix.account(0)?.into());
            payload.insert("to".into(), ix.account(1)?.into());
            payload.insert("source".into(), "instruction".into());
            Ok(payload)
        }),
    ));
    decoder
}

fn config(start_height: u64) -> IndexerConfig {
    IndexerConfig {
        start_height: Some(start_height),
        batch_size: 10,
        max_concurrency: 3,
        max_retry_attempts: 3,
        backoff_base: Duration::from_millis(100),
        backoff_max: Duration::from_secs(1),
        poll_interval: Duration::from_secs(1),
        ..Default::default()
    }
}

fn supervisor(config: IndexerConfig, ledger: &Arc<MockLedger>, repo: &Arc<InMemoryRepository>) -> Arc<Supervisor> {
    Arc::new(Supervisor::new(config, ledger.clone(), repo.clone(), decoder()))
}

fn spawn(supervisor: &Arc<Supervisor>) -> JoinHandle<Result<(), IndexerError>> {
    let supervisor = supervisor.clone();
    tokio::spawn(async move { supervisor.start().await })
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

async fn stop(supervisor: &Arc<Supervisor>, runner: JoinHandle<Result<(), IndexerError>>) {
    supervisor.shutdown().await.unwrap();
    runner.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_window_fully_indexed() {
    let ledger = Arc::new(MockLedger::with_head(105));
    let repo = Arc::new(InMemoryRepository::new());
    let supervisor = supervisor(config(100), &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.current_height() == 106).await;
    stop(&supervisor, runner).await;

    assert_eq!(ledger.fetched_heights(), vec![100, 101, 102, 103, 104, 105]);
    assert_eq!(repo.events_by_type("Transfer").len(), 6);
    assert_eq!(repo.cursor("default"), Some(106));
    assert_eq!(supervisor.health().stats.heights_indexed, 6);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_retried_with_backoff() {
    let transient = || LedgerError::Transient("429 Too Many Requests".into());
    let ledger = Arc::new(MockLedger::with_head(105).fail(102, [transient(), transient()]));
    let repo = Arc::new(InMemoryRepository::new());
    let supervisor = supervisor(config(100), &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.current_height() == 106).await;
    stop(&supervisor, runner).await;

    let attempts = ledger.fetch_times(102);
    assert_eq!(attempts.len(), 3);
    // Two backoff delays: at least 75% of 100ms and of 200ms
    assert!(attempts[2] - attempts[0] >= Duration::from_millis(225));
    for height in [100, 101, 103, 104, 105] {
        assert_eq!(ledger.fetch_times(height).len(), 1, "slot {height}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_grow_and_stay_capped() {
    let transient = || LedgerError::Transient("connection reset".into());
    let ledger = Arc::new(MockLedger::with_head(100).fail(100, (0..5).map(|_| transient())));
    let repo = Arc::new(InMemoryRepository::new());
    let config = IndexerConfig { max_retry_attempts: 6, backoff_max: Duration::from_millis(500), ..config(100) };
    let supervisor = supervisor(config, &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.current_height() == 101).await;
    stop(&supervisor, runner).await;

    let attempts = ledger.fetch_times(100);
    assert_eq!(attempts.len(), 6);
    let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    assert!(gaps.windows(2).all(|g| g[0] <= g[1]), "{gaps:?}");
    assert!(gaps.iter().all(|g| *g <= Duration::from_millis(500)), "{gaps:?}");
}

#[tokio::test(start_paused = true)]
async fn test_cursor_stops_at_exhausted_height() {
    let transient = || LedgerError::Transient("timeout".into());
    let ledger = Arc::new(MockLedger::with_head(105).fail(103, [transient(), transient(), transient()]));
    let repo = Arc::new(InMemoryRepository::new());
    let supervisor = supervisor(config(100), &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.health().stats.cycles >= 1).await;

    assert_eq!(supervisor.current_height(), 103);
    assert_eq!(repo.cursor("default"), Some(103));
    assert_eq!(ledger.fetch_times(104).len(), 1);
    let health = supervisor.health();
    assert_eq!(health.stats.heights_failed, 1);
    assert!(health.last_error.is_some());
    assert!(health.is_healthy());

    // Next cycle retries 103 and re-processes the heights above it
    wait_until(|| supervisor.current_height() == 106).await;
    stop(&supervisor, runner).await;

    assert_eq!(ledger.fetch_times(103).len(), 4);
    assert_eq!(ledger.fetch_times(104).len(), 2);
    assert_eq!(repo.events_by_type("Transfer").len(), 6);
    assert_eq!(supervisor.health().last_error, None);
}

#[tokio::test(start_paused = true)]
async fn test_unproduced_heights_are_deferred() {
    let ledger = Arc::new(MockLedger::with_head(102).fail(101, [LedgerError::NotFound { height: 101 }]));
    let repo = Arc::new(InMemoryRepository::new());
    let supervisor = supervisor(config(100), &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.health().stats.cycles >= 1).await;

    assert_eq!(supervisor.current_height(), 101);
    assert_eq!(ledger.fetch_times(101).len(), 1);
    assert_eq!(supervisor.health().stats.heights_deferred, 1);

    wait_until(|| supervisor.current_height() == 103).await;
    stop(&supervisor, runner).await;
}

#[tokio::test(start_paused = true)]
async fn test_skipped_slots_do_not_stall() {
    let ledger = Arc::new(MockLedger::with_head(102).fail(101, [LedgerError::Skipped { height: 101 }]));
    let repo = Arc::new(InMemoryRepository::new());
    let supervisor = supervisor(config(100), &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.current_height() == 103).await;
    stop(&supervisor, runner).await;

    assert_eq!(ledger.fetch_times(101).len(), 1);
    assert_eq!(repo.event_count(), 2);
    assert_eq!(supervisor.health().stats.heights_skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn test_instruction_event_preferred_over_log_event() {
    let ledger = Arc::new(MockLedger::with_head(100));
    let repo = Arc::new(InMemoryRepository::new());
    let supervisor = supervisor(config(100), &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.current_height() == 101).await;
    stop(&supervisor, runner).await;

    let events = repo.events_by_type("Transfer");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].payload["source"], "instruction");
    assert_eq!(events[0].payload["amount"], 1000);
    assert_eq!(events[0].payload["from"], "alice");
    assert_eq!(events[0].height, 100);
    assert_eq!(events[0].signature, "sig-100");
}

#[tokio::test]
async fn test_repeated_save_leaves_storage_unchanged() {
    let repo = InMemoryRepository::new();
    let decoder = decoder();
    let events: Vec<_> = (100..103).flat_map(|h| decoder.decode_block(&block(h))).collect();

    let first = repo.save_events(&events).await.unwrap();
    let snapshot = repo.events();
    let second = repo.save_events(&events).await.unwrap();

    assert_eq!(first, 3);
    assert_eq!(second, 0);
    assert_eq!(repo.events(), snapshot);
}

#[tokio::test(start_paused = true)]
async fn test_reprocessing_after_restart_is_idempotent() {
    let ledger = Arc::new(MockLedger::with_head(105));
    let repo = Arc::new(InMemoryRepository::new());

    let first = supervisor(config(100), &ledger, &repo);
    let runner = spawn(&first);
    wait_until(|| first.current_height() == 106).await;
    stop(&first, runner).await;
    let snapshot = repo.events();

    // A fresh indexer id has no cursor, so the same heights are indexed again
    let replay = supervisor(IndexerConfig { indexer_id: "replay".into(), ..config(100) }, &ledger, &repo);
    let runner = spawn(&replay);
    wait_until(|| replay.current_height() == 106).await;
    stop(&replay, runner).await;

    assert_eq!(ledger.fetch_times(100).len(), 2);
    assert_eq!(repo.events(), snapshot);
    assert_eq!(replay.health().stats.events_inserted, 0);

    // Restarting the first indexer id resumes after its persisted cursor
    let resumed = supervisor(config(100), &ledger, &repo);
    let runner = spawn(&resumed);
    wait_until(|| resumed.health().head_height.is_some()).await;
    assert_eq!(resumed.current_height(), 106);
    stop(&resumed, runner).await;
    assert_eq!(ledger.fetch_times(100).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_behind_head_indexes_every_missed_height() {
    let ledger = Arc::new(MockLedger::with_head(105));
    let repo = Arc::new(InMemoryRepository::new());

    let first = supervisor(config(100), &ledger, &repo);
    let runner = spawn(&first);
    wait_until(|| first.current_height() == 106).await;
    stop(&first, runner).await;

    // The chain moves on while the indexer is down
    ledger.head.store(125, Ordering::SeqCst);

    let restarted = supervisor(IndexerConfig { start_height: None, ..config(100) }, &ledger, &repo);
    let runner = spawn(&restarted);
    wait_until(|| restarted.current_height() == 126).await;
    stop(&restarted, runner).await;

    assert_eq!(ledger.fetched_heights(), (100..=125).collect::<Vec<_>>());
    assert_eq!(repo.event_count(), 26);
    assert_eq!(repo.cursor("default"), Some(126));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_is_bounded() {
    let ledger = Arc::new(MockLedger::with_head(119).delayed(Duration::from_millis(50)));
    let repo = Arc::new(InMemoryRepository::new());
    let config = IndexerConfig { batch_size: 20, max_concurrency: 3, ..config(100) };
    let supervisor = supervisor(config, &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| supervisor.current_height() == 120).await;
    stop(&supervisor, runner).await;

    assert_eq!(ledger.max_in_flight.load(Ordering::SeqCst), 3);
    assert_eq!(repo.event_count(), 20);
}

#[tokio::test(start_paused = true)]
async fn test_graceful_shutdown_drains_in_flight_blocks() {
    let ledger = Arc::new(MockLedger::with_head(109).delayed(Duration::from_millis(500)));
    let repo = Arc::new(InMemoryRepository::new());
    let supervisor = supervisor(config(100), &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| ledger.in_flight.load(Ordering::SeqCst) == 3).await;

    supervisor.shutdown().await.unwrap();

    assert_eq!(ledger.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(supervisor.health().state, SchedulerState::Stopped);
    assert!(runner.is_finished());
    runner.await.unwrap().unwrap();

    // Only the first three heights were ever dispatched, and they completed
    assert_eq!(ledger.fetched_heights(), vec![100, 101, 102]);
    assert_eq!(supervisor.current_height(), 103);
    assert_eq!(*supervisor.exit_status().borrow(), Some(ExitStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_timeout_bounds_drain() {
    let ledger = Arc::new(MockLedger::with_head(100).delayed(Duration::from_secs(60)));
    let repo = Arc::new(InMemoryRepository::new());
    let config = IndexerConfig { shutdown_timeout: Duration::from_secs(1), ..config(100) };
    let supervisor = supervisor(config, &ledger, &repo);

    let runner = spawn(&supervisor);
    wait_until(|| ledger.in_flight.load(Ordering::SeqCst) == 1).await;

    let requested = Instant::now();
    supervisor.shutdown().await.unwrap();

    assert!(Instant::now() - requested < Duration::from_secs(2));
    assert_ne!(supervisor.health().state, SchedulerState::Stopped);
    runner.abort();
}
