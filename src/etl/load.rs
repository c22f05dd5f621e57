/// Load Module
///
/// Handles storing decoded events and the indexer cursor in PostgreSQL.
use sqlx::PgPool;

use crate::models::DecodedEvent;

/// Batch insert one block's events within a database transaction
///
/// This function provides atomicity - either every event of the batch is stored
/// or none is. Rows are keyed by `dedup_key` and conflicts are ignored, so
/// replaying a block after a restart leaves the table unchanged.
///
/// Returns the number of events that were not already stored.
pub async fn batch_insert_events(pool: &PgPool, events: &[DecodedEvent]) -> Result<u64, sqlx::Error> {
    if events.is_empty() {
        return Ok(0);
    }

    // Start a database transaction
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for event in events {
        let result = sqlx::query(
            r#"
            INSERT INTO indexed_events (dedup_key, event_type, height, signature, emitted_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (dedup_key) DO NOTHING
            "#,
        )
        .bind(&event.dedup_key)
        .bind(&event.event_type)
        .bind(event.height as i64)
        .bind(&event.signature)
        .bind(event.emitted_at)
        .bind(serde_json::Value::Object(event.payload.clone()))
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected();
    }

    // Commit the transaction
    tx.commit().await?;

    tracing::debug!("Batch inserted {} of {} events", inserted, events.len());
    Ok(inserted)
}

/// Persist the cursor. The stored value never moves backwards.
pub async fn upsert_cursor(pool: &PgPool, indexer_id: &str, next_height: u64) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO indexer_cursors (indexer_id, next_height)
        VALUES ($1, $2)
        ON CONFLICT (indexer_id)
        DO UPDATE SET
            next_height = GREATEST(indexer_cursors.next_height, EXCLUDED.next_height),
            updated_at = NOW()
        "#,
    )
    .bind(indexer_id)
    .bind(next_height as i64)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn select_cursor(pool: &PgPool, indexer_id: &str) -> Result<Option<u64>, sqlx::Error> {
    let next_height =
        sqlx::query_scalar::<_, i64>("SELECT next_height FROM indexer_cursors WHERE indexer_id = $1")
            .bind(indexer_id)
            .fetch_optional(pool)
            .await?;

    Ok(next_height.map(|h| h as u64))
}
