/// Data Models Module
///
/// This module defines the core data structures used throughout the indexer.
/// Blocks, transactions and instructions are the ledger-side view produced by
/// the RPC layer; decoded events are what the repository persists.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field name -> value mapping carried by every decoded event
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A fetched block. Immutable once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub height: u64,
    pub hash: String,
    pub parent_hash: String,
    pub parent_height: u64,
    /// Unix epoch when the node did not report a block time
    pub timestamp: DateTime<Utc>,
    pub transactions: Vec<Transaction>,
}

/// A transaction with its instructions and program logs, in ledger order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    pub signature: String,
    pub instructions: Vec<Instruction>,
    pub log_lines: Vec<String>,
    pub success: bool,
}

/// A top-level instruction with its accounts already resolved to addresses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instruction {
    pub program_id: String,
    pub raw_data: Vec<u8>,
    pub accounts: Vec<String>,
}

impl Instruction {
    /// Address of the account at `index` in the instruction's account list
    pub fn account(&self, index: usize) -> Result<&str, crate::error::DecodeError> {
        self.accounts.get(index).map(String::as_str).ok_or(crate::error::DecodeError::MissingAccount { index })
    }
}

/// A program event decoded from a transaction.
///
/// `dedup_key` is derived from `(signature, event_type, ordinal)` so decoding the
/// same transaction twice always yields the same keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecodedEvent {
    pub dedup_key: String,
    pub event_type: String,
    pub height: u64,
    pub signature: String,
    pub emitted_at: DateTime<Utc>,
    pub payload: Payload,
}

/// Connection status information displayed at startup
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub endpoint: String,
    pub version: String,
    pub slot: u64,
}
