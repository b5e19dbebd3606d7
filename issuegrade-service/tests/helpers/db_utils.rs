//! Database helpers for tests

use sqlx::SqlitePool;

/// In-memory database with all tables created
pub async fn test_pool() -> SqlitePool {
    issuegrade_service::db::init_memory_pool()
        .await
        .expect("Failed to create in-memory database")
}

/// Make every feedback insert for `item_key` fail, simulating a storage
/// error for that one item
pub async fn fail_inserts_for(pool: &SqlitePool, item_key: &str) {
    let sql = format!(
        "CREATE TRIGGER fail_{trigger} BEFORE INSERT ON feedback_records \
         WHEN NEW.item_key = '{key}' \
         BEGIN SELECT RAISE(ABORT, 'simulated storage failure'); END",
        trigger = item_key.replace('-', "_"),
        key = item_key
    );
    sqlx::query(&sql)
        .execute(pool)
        .await
        .expect("Failed to create failure trigger");
}
