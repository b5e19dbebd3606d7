//! Event types for the issuegrade event system
//!
//! Provides the wire model for live analysis updates and the EventBus that
//! fans them out to subscribed connections.

mod bus;
mod shared_types;

pub use bus::{ConnectionId, ConnectionStats, EventBus, DEFAULT_SEND_TIMEOUT};
pub use shared_types::{ActivityLevel, FindingSummary};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Event payloads
///
/// Serialized adjacently tagged, so every event on the wire reads
/// `{ "event": "<type>", "data": { ... } }`; [`AnalysisEvent`] adds the
/// `timestamp` field alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Sent once when a connection is registered
    Connected {
        owner_id: String,
        job_id: Option<String>,
    },

    /// Items fetched, batch about to start
    JobStarted {
        job_id: String,
        query: String,
        total_items: usize,
        dry_run: bool,
    },

    /// Emitted after every attempted item
    JobProgress {
        job_id: String,
        current_item: String,
        processed: usize,
        total: usize,
        /// 0.0 - 100.0, one decimal
        percent: f64,
        failed: usize,
    },

    ItemStarted {
        job_id: Option<String>,
        item_key: String,
        summary: String,
    },

    /// Rubric evaluation finished (before narrative and persistence)
    ItemScored {
        job_id: Option<String>,
        item_key: String,
        score: f64,
        findings_breakdown: BTreeMap<String, FindingSummary>,
    },

    ItemComplete {
        job_id: Option<String>,
        item_key: String,
        score: f64,
        emoji: String,
        assessment: String,
    },

    ItemFailed {
        job_id: Option<String>,
        item_key: String,
        error: String,
    },

    JobCompleted {
        job_id: String,
        total_processed: usize,
        total_failed: usize,
        /// None when no item was scored successfully
        average_score: Option<f64>,
        duration_seconds: f64,
    },

    JobFailed {
        job_id: String,
        error: String,
    },

    JobCancelled {
        job_id: String,
        processed: usize,
        total: usize,
    },

    /// Owner-wide live feed entry (deliveries, notifications, warnings)
    Activity {
        kind: String,
        message: String,
        level: ActivityLevel,
        item_key: Option<String>,
    },
}

impl EventPayload {
    /// Get the wire name of this event
    pub fn event_type(&self) -> &'static str {
        match self {
            EventPayload::Connected { .. } => "connected",
            EventPayload::JobStarted { .. } => "job_started",
            EventPayload::JobProgress { .. } => "job_progress",
            EventPayload::ItemStarted { .. } => "item_started",
            EventPayload::ItemScored { .. } => "item_scored",
            EventPayload::ItemComplete { .. } => "item_complete",
            EventPayload::ItemFailed { .. } => "item_failed",
            EventPayload::JobCompleted { .. } => "job_completed",
            EventPayload::JobFailed { .. } => "job_failed",
            EventPayload::JobCancelled { .. } => "job_cancelled",
            EventPayload::Activity { .. } => "activity",
        }
    }

    /// Job this event belongs to, if any
    pub fn job_id(&self) -> Option<&str> {
        match self {
            EventPayload::JobStarted { job_id, .. }
            | EventPayload::JobProgress { job_id, .. }
            | EventPayload::JobCompleted { job_id, .. }
            | EventPayload::JobFailed { job_id, .. }
            | EventPayload::JobCancelled { job_id, .. } => Some(job_id),
            EventPayload::Connected { job_id, .. }
            | EventPayload::ItemStarted { job_id, .. }
            | EventPayload::ItemScored { job_id, .. }
            | EventPayload::ItemComplete { job_id, .. }
            | EventPayload::ItemFailed { job_id, .. } => job_id.as_deref(),
            EventPayload::Activity { .. } => None,
        }
    }

    /// Whether this event ends a job's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::JobCompleted { .. }
                | EventPayload::JobFailed { .. }
                | EventPayload::JobCancelled { .. }
        )
    }
}

/// One timestamped event as delivered to a connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl AnalysisEvent {
    /// Stamp a payload with the current time
    pub fn now(payload: EventPayload) -> Self {
        Self {
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.event_type()
    }

    /// Serialize to the single-line JSON wire form
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl From<EventPayload> for AnalysisEvent {
    fn from(payload: EventPayload) -> Self {
        AnalysisEvent::now(payload)
    }
}

/// Progress percentage rounded to one decimal (0 when total is 0)
pub fn progress_percent(processed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((processed as f64 / total as f64) * 1000.0).round() / 10.0
}
