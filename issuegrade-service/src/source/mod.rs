//! External collaborators
//!
//! The analysis core only sees these traits:
//! - [`ItemSource`] fetches items from the issue tracker
//! - [`Critic`] turns an already-scored item into narrative feedback
//! - [`DeliverySink`] pushes feedback back out (e.g. as a comment)
//!
//! Implementations: [`JiraClient`] (source + sink over HTTP), [`RubricCritic`]
//! (band-based narrative, also the fallback critic) and
//! [`UnconfiguredSource`] for a service started without tracker credentials.

pub mod critic;
pub mod jira;
pub mod unconfigured;

pub use critic::{format_feedback_markdown, RubricCritic};
pub use jira::{JiraClient, JiraConfig};
pub use unconfigured::UnconfiguredSource;

use crate::models::{Item, Narrative};
use crate::rubric::ScoredResult;
use async_trait::async_trait;
use thiserror::Error;

/// Errors from item sources, critics and delivery sinks
#[derive(Debug, Error)]
pub enum SourceError {
    /// Network communication error (connect, timeout, TLS)
    #[error("Network error: {0}")]
    Network(String),

    /// Item or resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials rejected (401/403)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Rate limited and retries exhausted
    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Any other non-success response
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body did not match the expected shape
    #[error("Parse error: {0}")]
    Parse(String),

    /// No collaborator configured for this operation
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

/// Issue tracker read access
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Items matching `query`, in source order, at most `max_results`
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Item>, SourceError>;

    /// One item by key
    async fn get(&self, item_key: &str) -> Result<Item, SourceError>;
}

/// Narrative generation over a deterministic score
#[async_trait]
pub trait Critic: Send + Sync {
    /// Name for logging
    fn name(&self) -> &'static str;

    async fn critique(&self, item: &Item, scored: &ScoredResult) -> Result<Narrative, SourceError>;
}

/// Outward delivery of feedback
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(
        &self,
        item: &Item,
        scored: &ScoredResult,
        narrative: &Narrative,
    ) -> Result<(), SourceError>;
}
