//! Delivery idempotency cache
//!
//! One row per item key holding the fingerprint that was last acted on.

use super::{parse_optional_db_time, to_db_time};
use crate::models::DeliveryStats;
use chrono::Utc;
use issuegrade_common::Result;
use sqlx::{Executor, Row, Sqlite, SqlitePool};

/// Fingerprint last acted on for a key, if any
pub async fn cached_fingerprint<'e, E>(executor: E, item_key: &str) -> Result<Option<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let fingerprint = sqlx::query_scalar(
        "SELECT last_fingerprint FROM delivery_cache WHERE item_key = ?",
    )
    .bind(item_key)
    .fetch_optional(executor)
    .await?;
    Ok(fingerprint)
}

/// Atomic upsert: insert with count 1 or bump the existing count
pub async fn upsert<'e, E>(executor: E, item_key: &str, fingerprint: &str) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO delivery_cache (item_key, last_fingerprint, last_seen_at, occurrence_count)
        VALUES (?, ?, ?, 1)
        ON CONFLICT(item_key) DO UPDATE SET
            last_fingerprint = excluded.last_fingerprint,
            last_seen_at = excluded.last_seen_at,
            occurrence_count = delivery_cache.occurrence_count + 1
        "#,
    )
    .bind(item_key)
    .bind(fingerprint)
    .bind(to_db_time(Utc::now()))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn occurrence_count(pool: &SqlitePool, item_key: &str) -> Result<Option<i64>> {
    let count = sqlx::query_scalar("SELECT occurrence_count FROM delivery_cache WHERE item_key = ?")
        .bind(item_key)
        .fetch_optional(pool)
        .await?;
    Ok(count)
}

pub async fn stats(pool: &SqlitePool) -> Result<DeliveryStats> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total_items,
               COALESCE(SUM(occurrence_count), 0) AS total_occurrences,
               MAX(last_seen_at) AS last_activity
        FROM delivery_cache
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(DeliveryStats {
        total_items: row.try_get("total_items")?,
        total_occurrences: row.try_get("total_occurrences")?,
        last_activity: parse_optional_db_time("last_seen_at", row.try_get("last_activity")?)?,
    })
}

/// Delete every cache row, returning how many were removed
pub async fn clear(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM delivery_cache").execute(pool).await?;
    Ok(result.rows_affected())
}
