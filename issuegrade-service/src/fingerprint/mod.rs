//! Content fingerprints and revision tracking
//!
//! A fingerprint is the SHA-256 of the item fields that matter for scoring.
//! [`FingerprintTracker`] uses it to
//! - append feedback records with a revision chain (revision bumps only when
//!   the content changed), and
//! - decide whether an outward action (posting a comment) is still needed.
//!
//! All storage work for one item key runs under that key's async lock, inside
//! a single sqlx transaction.

mod key_locks;

use crate::db::{delivery_cache, feedback};
use crate::models::{DeliveryStats, FeedbackRecord, Item, RecordDetails, RevisionSummary};
use crate::utils::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use chrono::Utc;
use issuegrade_common::{Error, Result};
use key_locks::KeyLocks;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::future::Future;

/// Stable hex SHA-256 over `title|description|sorted labels|estimate`
///
/// Labels are sorted first, so label order never changes the fingerprint.
pub fn content_fingerprint(item: &Item) -> String {
    let mut labels: Vec<&str> = item.labels.iter().map(String::as_str).collect();
    labels.sort_unstable();

    let estimate = match item.estimate {
        Some(value) => format!("{:?}", value),
        None => "None".to_string(),
    };

    let content = format!(
        "{}|{}|{}|{}",
        item.summary,
        item.description,
        labels.join(","),
        estimate
    );
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Idempotency and revision-chain tracking over SQLite
#[derive(Clone)]
pub struct FingerprintTracker {
    pool: SqlitePool,
    locks: KeyLocks,
}

impl FingerprintTracker {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: KeyLocks::default(),
        }
    }

    /// Append a feedback record and link it into the key's revision chain
    ///
    /// The revision number increments only when `fingerprint` differs from
    /// the latest record's; an unchanged re-score still writes a row that
    /// keeps the revision number.
    pub async fn record(
        &self,
        item_key: &str,
        fingerprint: &str,
        score: f64,
        details: &RecordDetails,
    ) -> Result<FeedbackRecord> {
        let _guard = self.locks.acquire(item_key).await;

        let record = retry_on_lock("record feedback", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            let mut tx = self.pool.begin().await?;

            let latest = feedback::latest_record(&mut *tx, item_key).await?;
            let (revision_number, previous_record_id) = match &latest {
                None => (1, None),
                Some(prev) if prev.fingerprint != fingerprint => (prev.revision_number + 1, Some(prev.id)),
                Some(prev) => (prev.revision_number, Some(prev.id)),
            };

            let created_at = Utc::now();
            let is_passing = score >= details.passing_threshold;
            let new_record = feedback::NewFeedbackRecord {
                item_key,
                fingerprint,
                score,
                revision_number,
                previous_record_id,
                is_passing,
                emoji: &details.emoji,
                assessment: &details.assessment,
                findings: &details.findings,
                created_at,
            };
            let id = feedback::insert_record(&mut *tx, &new_record).await?;
            tx.commit().await?;

            Ok::<_, Error>(FeedbackRecord {
                id,
                item_key: item_key.to_string(),
                fingerprint: fingerprint.to_string(),
                score,
                revision_number,
                previous_record_id,
                is_passing,
                emoji: details.emoji.clone(),
                assessment: details.assessment.clone(),
                findings: details.findings.clone(),
                created_at,
            })
        })
        .await?;

        tracing::debug!(
            item_key,
            record_id = record.id,
            revision = record.revision_number,
            score,
            "Feedback recorded"
        );
        Ok(record)
    }

    /// True when no action was taken for this key yet or the content changed since
    pub async fn should_act(&self, item_key: &str, fingerprint: &str) -> Result<bool> {
        let cached = delivery_cache::cached_fingerprint(&self.pool, item_key).await?;
        Ok(cached.as_deref() != Some(fingerprint))
    }

    /// Record that the action for this fingerprint happened
    pub async fn mark_acted(&self, item_key: &str, fingerprint: &str) -> Result<()> {
        let _guard = self.locks.acquire(item_key).await;
        self.upsert_cache(item_key, fingerprint).await
    }

    async fn upsert_cache(&self, item_key: &str, fingerprint: &str) -> Result<()> {
        retry_on_lock("mark acted", DEFAULT_MAX_LOCK_WAIT_MS, || async {
            delivery_cache::upsert(&self.pool, item_key, fingerprint).await
        })
        .await
    }

    /// Run `action` only if the content changed, then mark it acted
    ///
    /// Check, action and mark happen under the key's lock, so two concurrent
    /// callers with the same fingerprint run the action once. Returns whether
    /// the action ran. An action error is returned and nothing is marked.
    pub async fn deliver_if_changed<F, Fut, E>(
        &self,
        item_key: &str,
        fingerprint: &str,
        action: F,
    ) -> Result<bool>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: std::fmt::Display,
    {
        let _guard = self.locks.acquire(item_key).await;

        let cached = delivery_cache::cached_fingerprint(&self.pool, item_key).await?;
        if cached.as_deref() == Some(fingerprint) {
            tracing::debug!(item_key, "Content unchanged, delivery skipped");
            return Ok(false);
        }

        action()
            .await
            .map_err(|e| Error::Internal(format!("Delivery for {} failed: {}", item_key, e)))?;

        self.upsert_cache(item_key, fingerprint).await?;
        tracing::debug!(item_key, "Delivery performed and cached");
        Ok(true)
    }

    /// Most recent record for a key
    pub async fn latest(&self, item_key: &str) -> Result<Option<FeedbackRecord>> {
        feedback::latest_record(&self.pool, item_key).await
    }

    /// All records for a key in creation order
    pub async fn history(&self, item_key: &str) -> Result<Vec<FeedbackRecord>> {
        feedback::history(&self.pool, item_key).await
    }

    /// Revision overview; `NotFound` when the key was never scored
    pub async fn revision_summary(&self, item_key: &str) -> Result<RevisionSummary> {
        let history = self.history(item_key).await?;
        let (Some(first), Some(latest)) = (history.first(), history.last()) else {
            return Err(Error::NotFound(format!("No feedback recorded for {}", item_key)));
        };

        Ok(RevisionSummary {
            item_key: item_key.to_string(),
            total_revisions: history.iter().map(|r| r.revision_number).max().unwrap_or(1),
            total_records: history.len(),
            revisions_to_pass: history.iter().find(|r| r.is_passing).map(|r| r.revision_number),
            first_score: Some(first.score),
            latest_score: Some(latest.score),
            is_passing: latest.is_passing,
        })
    }

    pub async fn delivery_stats(&self) -> Result<DeliveryStats> {
        delivery_cache::stats(&self.pool).await
    }

    /// Forget every delivery; the next check for any key acts again
    pub async fn clear_delivery_cache(&self) -> Result<u64> {
        let removed = delivery_cache::clear(&self.pool).await?;
        tracing::info!(removed, "Delivery cache cleared");
        Ok(removed)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_ignores_label_order() {
        let a = Item::new("A-1", "Add login", "desc").with_labels(["b", "a", "c"]);
        let b = Item::new("A-1", "Add login", "desc").with_labels(["c", "b", "a"]);
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let base = Item::new("A-1", "Add login", "desc");
        let fp = content_fingerprint(&base);
        assert_eq!(fp.len(), 64);

        assert_ne!(fp, content_fingerprint(&Item::new("A-1", "Add logout", "desc")));
        assert_ne!(fp, content_fingerprint(&base.clone().with_estimate(3.0)));
        assert_ne!(fp, content_fingerprint(&base.clone().with_labels(["x"])));
    }

    #[test]
    fn test_fingerprint_ignores_key_and_metadata() {
        let mut a = Item::new("A-1", "Add login", "desc");
        let mut b = Item::new("B-9", "Add login", "desc");
        a.status = Some("Open".into());
        b.assignee = Some("someone".into());
        assert_eq!(content_fingerprint(&a), content_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_matches_known_digest() {
        let item = Item::new("A-1", "t", "d");
        // sha256("t|d||None")
        let expected = format!("{:x}", Sha256::digest(b"t|d||None"));
        assert_eq!(content_fingerprint(&item), expected);
    }
}
