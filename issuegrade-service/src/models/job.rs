//! Batch analysis job state machine
//!
//! A job moves `pending → running → {completed, failed, cancelled}`.
//! Terminal states have no outgoing transitions; the persisted row is the
//! source of truth and every transition is a conditional update on it.

use crate::rubric::RubricConfig;
use chrono::{DateTime, Utc};
use issuegrade_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound accepted for `max_items`
pub const MAX_ITEMS_LIMIT: usize = 1000;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(Error::Internal(format!("Unknown job status: {}", other))),
        }
    }
}

/// Options supplied when a job is submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Maximum number of items fetched from the source (1..=1000)
    pub max_items: usize,
    /// Score and record, but never deliver
    pub dry_run: bool,
    /// Deliver feedback through the delivery sink when content changed
    pub post_comment: bool,
    /// Publish an owner-wide summary when the job completes
    pub notify: bool,
    /// Rubric override for this job; the service rubric is used when absent
    pub rubric: Option<RubricConfig>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            max_items: 50,
            dry_run: false,
            post_comment: false,
            notify: false,
            rubric: None,
        }
    }
}

impl JobOptions {
    pub fn validate(&self) -> Result<()> {
        if self.max_items == 0 || self.max_items > MAX_ITEMS_LIMIT {
            return Err(Error::InvalidInput(format!(
                "max_items must be between 1 and {}, got {}",
                MAX_ITEMS_LIMIT, self.max_items
            )));
        }
        if let Some(rubric) = &self.rubric {
            rubric.validate()?;
        }
        Ok(())
    }

    /// Whether results should be pushed to the delivery sink
    pub fn should_deliver(&self) -> bool {
        self.post_comment && !self.dry_run
    }
}

/// Aggregate over successfully scored items
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSummary {
    pub average: f64,
    pub lowest: f64,
    pub highest: f64,
}

impl ScoreSummary {
    /// None when no item was scored; average rounded to one decimal
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let sum: f64 = scores.iter().sum();
        let lowest = scores.iter().copied().fold(f64::INFINITY, f64::min);
        let highest = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            average: ((sum / scores.len() as f64) * 10.0).round() / 10.0,
            lowest,
            highest,
        })
    }
}

/// Persisted batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub owner_id: String,
    pub query: String,
    pub options: JobOptions,
    pub status: JobStatus,
    pub total: usize,
    pub processed: usize,
    pub failed_count: usize,
    pub current_item_key: Option<String>,
    pub score_summary: Option<ScoreSummary>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Job {
    /// Create a new pending job with a fresh id
    pub fn new(owner_id: impl Into<String>, query: impl Into<String>, options: JobOptions) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            query: query.into(),
            options,
            status: JobStatus::Pending,
            total: 0,
            processed: 0,
            failed_count: 0,
            current_item_key: None,
            score_summary: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Progress percentage (0.0 - 100.0)
    pub fn percent(&self) -> f64 {
        issuegrade_common::events::progress_percent(self.processed, self.total)
    }
}
