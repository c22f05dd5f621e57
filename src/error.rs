/// Error Module
///
/// Error taxonomy for the indexing pipeline. Collaborator errors are classified
/// at the boundary into retryable and non-retryable kinds so the pipeline never
/// has to inspect transport or driver details.
use thiserror::Error;

use crate::pipeline::PipelineStage;

/// Errors returned by a ledger client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger has not produced this height yet.
    #[error("block at height {height} is not available yet")]
    NotFound { height: u64 },

    /// The height was skipped by the ledger and will never hold a block.
    #[error("height {height} was skipped by the ledger")]
    Skipped { height: u64 },

    #[error("transient ledger error: {0}")]
    Transient(String),

    #[error("fatal ledger error: {0}")]
    Fatal(String),
}

impl LedgerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors returned by an event repository.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("fatal storage error: {0}")]
    Fatal(String),
}

impl RepositoryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => true,
            // Connection exceptions (08xxx), serialization failures, deadlocks,
            // too many connections and admin shutdown are worth another attempt.
            sqlx::Error::Database(db) => db
                .code()
                .map(|code| code.starts_with("08") || matches!(&*code, "40001" | "40P01" | "53300" | "57P01"))
                .unwrap_or(false),
            _ => false,
        };

        if transient {
            Self::Transient(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}

/// Structural failure while decoding a single instruction.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("insufficient bytes: needed {needed}, {remaining} remaining")]
    InsufficientBytes { needed: usize, remaining: usize },

    #[error("invalid tag {tag} for {type_name}")]
    InvalidEnumTag { type_name: &'static str, tag: u8 },

    #[error("invalid utf-8 string")]
    InvalidUtf8,

    #[error("instruction has no account at position {index}")]
    MissingAccount { index: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor cannot move backwards from {current} to {requested}")]
    OutOfOrderAdvance { current: u64, requested: u64 },
}

/// Per-height failure reported by the block processor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// The height does not exist yet; requeue it on a later cycle.
    #[error("height {height} is not ready")]
    NotReady { height: u64 },

    #[error("height {height}: {stage} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { height: u64, stage: PipelineStage, attempts: u32, last_error: String },

    #[error("height {height}: {stage} failed permanently: {reason}")]
    Fatal { height: u64, stage: PipelineStage, reason: String },

    #[error("height {height}: {stage} abandoned on shutdown")]
    Cancelled { height: u64, stage: PipelineStage },
}

impl ProcessError {
    pub fn height(&self) -> u64 {
        match self {
            Self::NotReady { height }
            | Self::RetriesExhausted { height, .. }
            | Self::Fatal { height, .. }
            | Self::Cancelled { height, .. } => *height,
        }
    }

    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// Process-level errors surfaced by the supervisor.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("indexer is already running")]
    AlreadyRunning,

    #[error("ledger unreachable after {failures} consecutive failures: {last_error}")]
    LedgerUnreachable { failures: u32, last_error: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Cursor(#[from] CursorError),
}
