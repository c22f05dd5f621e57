/// Extract Module
///
/// Converts blocks returned by the Solana RPC into the indexer's block model.
/// Transactions are requested base64-encoded so instruction data arrives as raw
/// bytes and can be decoded against each program's binary layout.
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::{EncodedTransactionWithStatusMeta, UiConfirmedBlock, UiLoadedAddresses};

use crate::models::{Block, Instruction, Transaction};

/// Unix epoch when the node reports no (or an out of range) block time, so
/// re-fetching a height always yields the same timestamp.
fn block_timestamp(block_time: Option<i64>) -> DateTime<Utc> {
    block_time.and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0)).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Convert a fetched block. Transactions that cannot be decoded are logged and skipped.
pub fn block_from_rpc(height: u64, block: UiConfirmedBlock) -> Block {
    let transactions = block.transactions.as_deref().map(parse_transactions_from_block).unwrap_or_default();

    let timestamp = block_timestamp(block.block_time);

    Block {
        height,
        hash: block.blockhash,
        parent_hash: block.previous_blockhash,
        parent_height: block.parent_slot,
        timestamp,
        transactions,
    }
}

/// Parse transactions from a block, keeping block order
pub fn parse_transactions_from_block(transactions: &[EncodedTransactionWithStatusMeta]) -> Vec<Transaction> {
    let mut extracted_transactions = Vec::with_capacity(transactions.len());

    for (index, tx) in transactions.iter().enumerate() {
        match parse_single_transaction(tx) {
            Ok(extracted) => extracted_transactions.push(extracted),
            Err(e) => {
                tracing::warn!("Failed to parse transaction at index {}: {:#}", index, e);
                continue;
            }
        }
    }

    extracted_transactions
}

fn parse_single_transaction(tx: &EncodedTransactionWithStatusMeta) -> Result<Transaction> {
    let meta = tx.meta.as_ref().context("Transaction has no metadata")?;
    let versioned = tx.transaction.decode().context("Transaction is not binary encoded")?;

    // If err is None, the transaction succeeded
    let success = meta.err.is_none();

    let log_lines: Option<Vec<String>> = meta.log_messages.clone().into();
    let loaded: Option<UiLoadedAddresses> = meta.loaded_addresses.clone().into();
    let loaded_keys: Vec<String> = loaded.map(|l| l.writable.into_iter().chain(l.readonly).collect()).unwrap_or_default();

    transaction_from_versioned(&versioned, success, log_lines.unwrap_or_default(), loaded_keys)
}

/// Build a transaction from its decoded wire form.
///
/// Account indices address the static keys followed by the keys loaded from
/// address lookup tables (writable first, then readonly).
pub fn transaction_from_versioned(
    tx: &VersionedTransaction,
    success: bool,
    log_lines: Vec<String>,
    loaded_keys: Vec<String>,
) -> Result<Transaction> {
    let signature = tx.signatures.first().context("Transaction has no signatures")?.to_string();

    let account_keys: Vec<String> =
        tx.message.static_account_keys().iter().map(|key| key.to_string()).chain(loaded_keys).collect();

    let resolve = |index: u8| -> Result<String> {
        account_keys
            .get(index as usize)
            .cloned()
            .with_context(|| format!("Account index {} out of range ({} keys) in {}", index, account_keys.len(), signature))
    };

    let mut instructions = Vec::with_capacity(tx.message.instructions().len());
    for compiled in tx.message.instructions() {
        let program_id = resolve(compiled.program_id_index)?;
        let accounts = compiled.accounts.iter().map(|&index| resolve(index)).collect::<Result<Vec<_>>>()?;

        instructions.push(Instruction { program_id, raw_data: compiled.data.clone(), accounts });
    }

    Ok(Transaction { signature, instructions, log_lines, success })
}
