//! Shared type definitions for event data
//!
//! Common structs used across multiple event types.

use serde::{Deserialize, Serialize};

/// Per-rule entry in an `item_scored` breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindingSummary {
    /// Rule score scaled to 0-100, one decimal
    pub score: f64,
    /// Weight the rule contributed with
    pub weight: f64,
    pub message: String,
    pub suggestion: Option<String>,
}

/// Severity of an `activity` feed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
    Error,
}
