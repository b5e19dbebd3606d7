//! Feedback records and revision tracking types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Narrative produced by a critic from an already-scored item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub assessment: String,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub suggestions: Vec<String>,
    pub emoji: String,
}

/// Immutable record of one scoring of one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: i64,
    pub item_key: String,
    pub fingerprint: String,
    pub score: f64,
    /// Starts at 1; increments only when content changed
    pub revision_number: i64,
    /// Immediately preceding record for the same key
    pub previous_record_id: Option<i64>,
    pub is_passing: bool,
    pub emoji: String,
    pub assessment: String,
    /// Rule breakdown as stored JSON
    pub findings: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Denormalized fields stored alongside a record
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDetails {
    /// Score at or above this marks the record as passing
    pub passing_threshold: f64,
    pub emoji: String,
    pub assessment: String,
    pub findings: serde_json::Value,
}

impl Default for RecordDetails {
    fn default() -> Self {
        Self {
            passing_threshold: crate::rubric::DEFAULT_PASSING_THRESHOLD,
            emoji: String::new(),
            assessment: String::new(),
            findings: serde_json::Value::Null,
        }
    }
}

/// Revision overview for one item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevisionSummary {
    pub item_key: String,
    /// Highest revision number seen
    pub total_revisions: i64,
    pub total_records: usize,
    /// First revision whose record passed, if any
    pub revisions_to_pass: Option<i64>,
    pub first_score: Option<f64>,
    pub latest_score: Option<f64>,
    pub is_passing: bool,
}

/// Idempotency cache statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total_items: i64,
    pub total_occurrences: i64,
    pub last_activity: Option<DateTime<Utc>>,
}
