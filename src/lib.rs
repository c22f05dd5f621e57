/// Slot Event Indexer
///
/// Follows a Solana-style ledger height by height, decodes program events from
/// each block and stores them idempotently, tracking a durable resume cursor.
pub mod backoff;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod etl;
pub mod models;
pub mod pipeline;
pub mod rpc;
pub mod scheduler;
pub mod supervisor;

pub use config::IndexerConfig;
pub use cursor::Cursor;
pub use db::{Database, EventRepository, InMemoryRepository};
pub use error::{CursorError, DecodeError, IndexerError, LedgerError, ProcessError, RepositoryError};
pub use etl::transform::{EventDecoder, InstructionDecoder};
pub use models::{Block, DecodedEvent, Instruction, Transaction};
pub use pipeline::{BlockOutcome, BlockProcessor, PipelineStats};
pub use rpc::{LedgerClient, SolanaRpcClient};
pub use scheduler::SchedulerState;
pub use supervisor::{ExitStatus, HealthReport, Supervisor};
