//! Analysis job persistence
//!
//! Status transitions are conditional updates (`WHERE status = ...`). Each
//! returns whether the row actually moved, so a concurrent cancel is never
//! overwritten by the job task.

use super::{parse_db_time, parse_optional_db_time, to_db_time};
use crate::models::{Job, JobOptions, JobStatus, ScoreSummary};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use chrono::{DateTime, Utc};
use issuegrade_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

/// Error recorded on jobs that were still active when the service stopped
pub const RESTART_INTERRUPTED_ERROR: &str = "interrupted by service restart";

const JOB_COLUMNS: &str = "job_id, owner_id, query, options, status, total, processed, failed_count, \
     current_item_key, average_score, lowest_score, highest_score, created_at, started_at, \
     completed_at, error";

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let options: String = row.try_get("options")?;
    let options: JobOptions = serde_json::from_str(&options)
        .map_err(|e| Error::Internal(format!("Failed to deserialize options: {}", e)))?;
    let status: String = row.try_get("status")?;

    let average: Option<f64> = row.try_get("average_score")?;
    let lowest: Option<f64> = row.try_get("lowest_score")?;
    let highest: Option<f64> = row.try_get("highest_score")?;
    let score_summary = match (average, lowest, highest) {
        (Some(average), Some(lowest), Some(highest)) => Some(ScoreSummary {
            average,
            lowest,
            highest,
        }),
        _ => None,
    };

    let created_at: String = row.try_get("created_at")?;

    Ok(Job {
        job_id: row.try_get("job_id")?,
        owner_id: row.try_get("owner_id")?,
        query: row.try_get("query")?,
        options,
        status: status.parse()?,
        total: row.try_get::<i64, _>("total")? as usize,
        processed: row.try_get::<i64, _>("processed")? as usize,
        failed_count: row.try_get::<i64, _>("failed_count")? as usize,
        current_item_key: row.try_get("current_item_key")?,
        score_summary,
        created_at: parse_db_time("created_at", &created_at)?,
        started_at: parse_optional_db_time("started_at", row.try_get("started_at")?)?,
        completed_at: parse_optional_db_time("completed_at", row.try_get("completed_at")?)?,
        error: row.try_get("error")?,
    })
}

/// Persist a new job row
pub async fn insert_job(pool: &SqlitePool, job: &Job) -> Result<()> {
    // Prepare all data before touching the database
    let options = serde_json::to_string(&job.options)
        .map_err(|e| Error::Internal(format!("Failed to serialize options: {}", e)))?;
    let created_at = to_db_time(job.created_at);

    retry_on_lock("insert_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO analysis_jobs (
                job_id, owner_id, query, options, status,
                total, processed, failed_count, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(&job.owner_id)
        .bind(&job.query)
        .bind(&options)
        .bind(job.status.as_str())
        .bind(job.total as i64)
        .bind(job.processed as i64)
        .bind(job.failed_count as i64)
        .bind(&created_at)
        .execute(pool)
        .await?;
        Ok::<_, Error>(())
    })
    .await
}

pub async fn load_job(pool: &SqlitePool, job_id: &str) -> Result<Option<Job>> {
    let sql = format!("SELECT {} FROM analysis_jobs WHERE job_id = ?", JOB_COLUMNS);
    let row = sqlx::query(&sql).bind(job_id).fetch_optional(pool).await?;
    row.as_ref().map(row_to_job).transpose()
}

/// Load a job only if it belongs to `owner_id`
pub async fn load_owned_job(pool: &SqlitePool, owner_id: &str, job_id: &str) -> Result<Option<Job>> {
    let sql = format!(
        "SELECT {} FROM analysis_jobs WHERE job_id = ? AND owner_id = ?",
        JOB_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(job_id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(row_to_job).transpose()
}

/// Most recent jobs of one owner
pub async fn list_jobs(pool: &SqlitePool, owner_id: &str, limit: u32) -> Result<Vec<Job>> {
    let sql = format!(
        "SELECT {} FROM analysis_jobs WHERE owner_id = ? ORDER BY created_at DESC LIMIT ?",
        JOB_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;
    rows.iter().map(row_to_job).collect()
}

/// Persisted status only (cheap cancellation poll)
pub async fn load_status(pool: &SqlitePool, job_id: &str) -> Result<Option<JobStatus>> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM analysis_jobs WHERE job_id = ?")
            .bind(job_id)
            .fetch_optional(pool)
            .await?;
    status.map(|s| s.parse()).transpose()
}

/// pending → running
pub async fn mark_running(pool: &SqlitePool, job_id: &str, started_at: DateTime<Utc>) -> Result<bool> {
    let started_at = to_db_time(started_at);
    retry_on_lock("mark_running", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET status = 'running', started_at = ? \
             WHERE job_id = ? AND status = 'pending'",
        )
        .bind(&started_at)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected() > 0)
    })
    .await
}

/// Record the number of fetched items
pub async fn set_total(pool: &SqlitePool, job_id: &str, total: usize) -> Result<bool> {
    retry_on_lock("set_total", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET total = ? WHERE job_id = ? AND status = 'running'",
        )
        .bind(total as i64)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected() > 0)
    })
    .await
}

/// Point the job at the item currently being scored
pub async fn set_current_item(pool: &SqlitePool, job_id: &str, item_key: &str) -> Result<bool> {
    retry_on_lock("set_current_item", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            "UPDATE analysis_jobs SET current_item_key = ? WHERE job_id = ? AND status = 'running'",
        )
        .bind(item_key)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected() > 0)
    })
    .await
}

/// Persist counters; never moves `processed` backwards
///
/// Not conditioned on status: the item that was in flight when a cancel
/// landed is still counted.
pub async fn update_counters(
    pool: &SqlitePool,
    job_id: &str,
    processed: usize,
    failed_count: usize,
) -> Result<()> {
    retry_on_lock("update_counters", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            "UPDATE analysis_jobs SET processed = MAX(processed, ?), failed_count = MAX(failed_count, ?) \
             WHERE job_id = ?",
        )
        .bind(processed as i64)
        .bind(failed_count as i64)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(())
    })
    .await
}

/// running → completed
pub async fn complete_job(
    pool: &SqlitePool,
    job_id: &str,
    summary: Option<ScoreSummary>,
    completed_at: DateTime<Utc>,
) -> Result<bool> {
    let completed_at = to_db_time(completed_at);
    retry_on_lock("complete_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs SET
                status = 'completed',
                current_item_key = NULL,
                average_score = ?,
                lowest_score = ?,
                highest_score = ?,
                completed_at = ?
            WHERE job_id = ? AND status = 'running'
            "#,
        )
        .bind(summary.map(|s| s.average))
        .bind(summary.map(|s| s.lowest))
        .bind(summary.map(|s| s.highest))
        .bind(&completed_at)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected() > 0)
    })
    .await
}

/// pending/running → failed
pub async fn fail_job(pool: &SqlitePool, job_id: &str, error: &str) -> Result<bool> {
    let completed_at = to_db_time(Utc::now());
    retry_on_lock("fail_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs SET
                status = 'failed',
                current_item_key = NULL,
                error = ?,
                completed_at = ?
            WHERE job_id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(error)
        .bind(&completed_at)
        .bind(job_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected() > 0)
    })
    .await
}

/// pending/running → cancelled
pub async fn cancel_job(pool: &SqlitePool, owner_id: &str, job_id: &str) -> Result<bool> {
    let completed_at = to_db_time(Utc::now());
    retry_on_lock("cancel_job", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        let result = sqlx::query(
            r#"
            UPDATE analysis_jobs SET
                status = 'cancelled',
                current_item_key = NULL,
                completed_at = ?
            WHERE job_id = ? AND owner_id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(&completed_at)
        .bind(job_id)
        .bind(owner_id)
        .execute(pool)
        .await?;
        Ok::<_, Error>(result.rows_affected() > 0)
    })
    .await
}

/// Clear the current item of a job that already reached a terminal state
pub async fn clear_current_item(pool: &SqlitePool, job_id: &str) -> Result<()> {
    sqlx::query("UPDATE analysis_jobs SET current_item_key = NULL WHERE job_id = ?")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Fail every non-terminal job left over from a previous process
///
/// Returns the number of jobs marked failed.
pub async fn recover_stale_jobs(pool: &SqlitePool) -> Result<u64> {
    let completed_at = to_db_time(Utc::now());
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs SET
            status = 'failed',
            current_item_key = NULL,
            error = ?,
            completed_at = ?
        WHERE status IN ('pending', 'running')
        "#,
    )
    .bind(RESTART_INTERRUPTED_ERROR)
    .bind(&completed_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
