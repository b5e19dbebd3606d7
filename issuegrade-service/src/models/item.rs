//! Work-tracking item as returned by an item source

use serde::{Deserialize, Serialize};

/// One issue to be scored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    /// Tracker key, e.g. `ABC-123`
    pub key: String,
    /// Title
    pub summary: String,
    /// Plain-text description (may be empty)
    pub description: String,
    pub labels: Vec<String>,
    /// Story points or time estimate
    pub estimate: Option<f64>,
    pub issue_type: String,
    pub status: Option<String>,
    pub assignee: Option<String>,
}

impl Item {
    pub fn new(key: impl Into<String>, summary: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            summary: summary.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_estimate(mut self, estimate: f64) -> Self {
        self.estimate = Some(estimate);
        self
    }
}
