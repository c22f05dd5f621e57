/// Database Module
///
/// This module defines the repository boundary the pipeline writes through and
/// its backends:
/// - `Database`: PostgreSQL connection pool, schema migrations, event and cursor storage
/// - `InMemoryRepository`: process-local storage for tests and ephemeral runs
pub mod memory;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::error::RepositoryError;
use crate::etl::load;
use crate::models::DecodedEvent;

pub use memory::InMemoryRepository;

/// Durable storage for decoded events and the indexer cursor.
///
/// Implementations must be safe for concurrent calls. `save_events` is
/// idempotent per `dedup_key`: saving an already stored key is a silent no-op.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Store a batch atomically; returns how many events were newly stored
    async fn save_events(&self, events: &[DecodedEvent]) -> Result<u64, RepositoryError>;

    async fn load_cursor(&self, indexer_id: &str) -> Result<Option<u64>, RepositoryError>;

    /// Persist the cursor; a value lower than the stored one is ignored
    async fn save_cursor(&self, indexer_id: &str, next_height: u64) -> Result<(), RepositoryError>;
}

pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect(database_url).await?;

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| RepositoryError::Fatal(e.to_string()))?;

        tracing::info!("Database migrations completed successfully");
        Ok(())
    }

    /// Test the database connection
    pub async fn test_connection(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;

        Ok(())
    }
}

#[async_trait]
impl EventRepository for Database {
    async fn save_events(&self, events: &[DecodedEvent]) -> Result<u64, RepositoryError> {
        Ok(load::batch_insert_events(&self.pool, events).await?)
    }

    async fn load_cursor(&self, indexer_id: &str) -> Result<Option<u64>, RepositoryError> {
        Ok(load::select_cursor(&self.pool, indexer_id).await?)
    }

    async fn save_cursor(&self, indexer_id: &str, next_height: u64) -> Result<(), RepositoryError> {
        Ok(load::upsert_cursor(&self.pool, indexer_id, next_height).await?)
    }
}
