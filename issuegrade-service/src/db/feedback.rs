//! Feedback record persistence
//!
//! Rows are append-only. The revision chain is built by the tracker; this
//! module only reads and inserts.

use super::{parse_db_time, to_db_time};
use crate::models::FeedbackRecord;
use chrono::{DateTime, Utc};
use issuegrade_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Executor, Row, Sqlite, SqlitePool};

const RECORD_COLUMNS: &str = "id, item_key, fingerprint, score, revision_number, previous_record_id, \
     is_passing, emoji, assessment, findings, created_at";

/// Values for a record about to be inserted
#[derive(Debug, Clone)]
pub struct NewFeedbackRecord<'a> {
    pub item_key: &'a str,
    pub fingerprint: &'a str,
    pub score: f64,
    pub revision_number: i64,
    pub previous_record_id: Option<i64>,
    pub is_passing: bool,
    pub emoji: &'a str,
    pub assessment: &'a str,
    pub findings: &'a serde_json::Value,
    pub created_at: DateTime<Utc>,
}

fn row_to_record(row: &SqliteRow) -> Result<FeedbackRecord> {
    let findings: String = row.try_get("findings")?;
    let findings = serde_json::from_str(&findings)
        .map_err(|e| Error::Internal(format!("Failed to deserialize findings: {}", e)))?;
    let created_at: String = row.try_get("created_at")?;

    Ok(FeedbackRecord {
        id: row.try_get("id")?,
        item_key: row.try_get("item_key")?,
        fingerprint: row.try_get("fingerprint")?,
        score: row.try_get("score")?,
        revision_number: row.try_get("revision_number")?,
        previous_record_id: row.try_get("previous_record_id")?,
        is_passing: row.try_get::<i64, _>("is_passing")? != 0,
        emoji: row.try_get("emoji")?,
        assessment: row.try_get("assessment")?,
        findings,
        created_at: parse_db_time("created_at", &created_at)?,
    })
}

/// Most recent record for a key (by creation time, then id)
pub async fn latest_record<'e, E>(executor: E, item_key: &str) -> Result<Option<FeedbackRecord>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let sql = format!(
        "SELECT {} FROM feedback_records WHERE item_key = ? ORDER BY created_at DESC, id DESC LIMIT 1",
        RECORD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(item_key)
        .fetch_optional(executor)
        .await?;

    row.as_ref().map(row_to_record).transpose()
}

/// Insert a record, returning its id
pub async fn insert_record<'e, E>(executor: E, record: &NewFeedbackRecord<'_>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let findings = serde_json::to_string(record.findings)
        .map_err(|e| Error::Internal(format!("Failed to serialize findings: {}", e)))?;

    let result = sqlx::query(
        r#"
        INSERT INTO feedback_records (
            item_key, fingerprint, score, revision_number, previous_record_id,
            is_passing, emoji, assessment, findings, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.item_key)
    .bind(record.fingerprint)
    .bind(record.score)
    .bind(record.revision_number)
    .bind(record.previous_record_id)
    .bind(record.is_passing as i64)
    .bind(record.emoji)
    .bind(record.assessment)
    .bind(findings)
    .bind(to_db_time(record.created_at))
    .execute(executor)
    .await?;

    Ok(result.last_insert_rowid())
}

/// All records for a key in creation order
pub async fn history(pool: &SqlitePool, item_key: &str) -> Result<Vec<FeedbackRecord>> {
    let sql = format!(
        "SELECT {} FROM feedback_records WHERE item_key = ? ORDER BY created_at ASC, id ASC",
        RECORD_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(item_key).fetch_all(pool).await?;
    rows.iter().map(row_to_record).collect()
}
