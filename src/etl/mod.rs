/// ETL Module
///
/// The data path of the indexer:
/// - Extract: Convert Solana RPC blocks into ledger-agnostic models
/// - Transform: Decode transactions into program events
/// - Load: Store events and the cursor in PostgreSQL
pub mod extract;
pub mod layout;
pub mod load;
pub mod logs;
pub mod parsers;
pub mod transform;
