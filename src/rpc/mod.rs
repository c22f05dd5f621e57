/// RPC Client Module
///
/// This module handles all interactions with the ledger. `LedgerClient` is the
/// boundary the pipeline depends on; `SolanaRpcClient` implements it over the
/// Solana JSON-RPC API and classifies RPC failures into the ledger error taxonomy.
use async_trait::async_trait;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcBlockConfig;
use solana_client::rpc_request::RpcError;
use solana_transaction_status::{TransactionDetails, UiTransactionEncoding};

use crate::error::LedgerError;
use crate::etl::extract::block_from_rpc;
use crate::models::{Block, ConnectionInfo};

/// Read access to the ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Highest height the ledger has produced
    async fn current_height(&self) -> Result<u64, LedgerError>;

    /// Fetch the block at `height`
    async fn fetch_block(&self, height: u64) -> Result<Block, LedgerError>;
}

// Solana JSON-RPC server error codes
const BLOCK_CLEANED_UP: i64 = -32001;
const SEND_TRANSACTION_PREFLIGHT_FAILURE: i64 = -32002;
const BLOCK_NOT_AVAILABLE: i64 = -32004;
const NODE_UNHEALTHY: i64 = -32005;
const SLOT_SKIPPED: i64 = -32007;
const LONG_TERM_STORAGE_SLOT_SKIPPED: i64 = -32009;
const MIN_CONTEXT_SLOT_NOT_REACHED: i64 = -32016;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

pub struct SolanaRpcClient {
    client: RpcClient,
    endpoint: String,
}

impl SolanaRpcClient {
    /// Create a new RPC client connected to the specified endpoint
    pub fn new(endpoint: String) -> Self {
        let client = RpcClient::new(endpoint.clone());

        Self { client, endpoint }
    }

    /// Get connection information for display
    pub async fn get_connection_info(&self) -> Result<ConnectionInfo, LedgerError> {
        let version = self.client.get_version().await.map_err(|e| classify(None, e))?;
        let slot = self.current_height().await?;

        Ok(ConnectionInfo { endpoint: self.endpoint.clone(), version: version.solana_core, slot })
    }

    fn block_config() -> RpcBlockConfig {
        RpcBlockConfig {
            encoding: Some(UiTransactionEncoding::Base64),
            transaction_details: Some(TransactionDetails::Full),
            rewards: Some(false),
            commitment: None,
            max_supported_transaction_version: Some(0),
        }
    }
}

#[async_trait]
impl LedgerClient for SolanaRpcClient {
    async fn current_height(&self) -> Result<u64, LedgerError> {
        self.client.get_slot().await.map_err(|e| classify(None, e))
    }

    async fn fetch_block(&self, height: u64) -> Result<Block, LedgerError> {
        tracing::debug!("Fetching block at slot {}", height);

        let block = self
            .client
            .get_block_with_config(height, Self::block_config())
            .await
            .map_err(|e| classify(Some(height), e))?;

        Ok(block_from_rpc(height, block))
    }
}

/// Map an RPC client error onto the ledger error taxonomy.
///
/// Only response codes that prove the request itself is wrong are fatal;
/// transport failures and unknown server errors are retried.
fn classify(height: Option<u64>, err: ClientError) -> LedgerError {
    match err.kind() {
        ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) => {
            classify_response_code(height, *code, err.to_string())
        }
        ClientErrorKind::SerdeJson(_) => LedgerError::Fatal(err.to_string()),
        _ => LedgerError::Transient(err.to_string()),
    }
}

fn classify_response_code(height: Option<u64>, code: i64, message: String) -> LedgerError {
    match (code, height) {
        (BLOCK_NOT_AVAILABLE, Some(height)) => LedgerError::NotFound { height },
        (SLOT_SKIPPED | LONG_TERM_STORAGE_SLOT_SKIPPED, Some(height)) => LedgerError::Skipped { height },
        (BLOCK_CLEANED_UP | SEND_TRANSACTION_PREFLIGHT_FAILURE | METHOD_NOT_FOUND | INVALID_PARAMS, _) => {
            LedgerError::Fatal(message)
        }
        (NODE_UNHEALTHY | MIN_CONTEXT_SLOT_NOT_REACHED, _) => LedgerError::Transient(message),
        _ => LedgerError::Transient(message),
    }
}
