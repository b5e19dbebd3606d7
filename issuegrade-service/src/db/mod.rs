//! Database access for issuegrade-service
//!
//! SQLite via sqlx. Tables are created idempotently at startup; there is no
//! migration framework.

pub mod delivery_cache;
pub mod feedback;
pub mod jobs;

use chrono::{DateTime, SecondsFormat, Utc};
use issuegrade_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;

/// Connections in the file-backed pool
pub const POOL_SIZE: u32 = 8;

/// Per-connection SQLite busy_timeout
pub const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection pool
///
/// Creates the parent directory and the database file when missing.
/// Every connection runs in WAL mode with a busy timeout.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::debug!(
        "Connecting to database: {} ({} connections, busy_timeout={}ms)",
        db_path.display(),
        POOL_SIZE,
        BUSY_TIMEOUT.as_millis()
    );

    let pool = SqlitePoolOptions::new()
        .max_connections(POOL_SIZE)
        .connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .busy_timeout(BUSY_TIMEOUT)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal)
                .create_if_missing(true),
        )
        .await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory pool with tables created
///
/// One connection, so every query sees the same in-memory database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create analysis_jobs, feedback_records and delivery_cache if missing
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            job_id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            query TEXT NOT NULL,
            options TEXT NOT NULL,
            status TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            processed INTEGER NOT NULL DEFAULT 0,
            failed_count INTEGER NOT NULL DEFAULT 0,
            current_item_key TEXT,
            average_score REAL,
            lowest_score REAL,
            highest_score REAL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_analysis_jobs_owner ON analysis_jobs (owner_id, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS feedback_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            item_key TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            score REAL NOT NULL,
            revision_number INTEGER NOT NULL DEFAULT 1,
            previous_record_id INTEGER
                REFERENCES feedback_records (id) ON DELETE SET NULL,
            is_passing INTEGER NOT NULL DEFAULT 0,
            emoji TEXT NOT NULL DEFAULT '',
            assessment TEXT NOT NULL DEFAULT '',
            findings TEXT NOT NULL DEFAULT 'null',
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_feedback_records_key ON feedback_records (item_key, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS delivery_cache (
            item_key TEXT PRIMARY KEY,
            last_fingerprint TEXT NOT NULL,
            last_seen_at TEXT NOT NULL,
            occurrence_count INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (analysis_jobs, feedback_records, delivery_cache)");

    Ok(())
}

/// Timestamp format stored in TEXT columns (sorts lexicographically)
pub(crate) fn to_db_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_db_time(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

pub(crate) fn parse_optional_db_time(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_db_time(column, &v)).transpose()
}
