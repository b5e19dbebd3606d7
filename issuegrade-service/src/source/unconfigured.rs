//! Placeholder collaborator for a service started without tracker credentials

use super::{DeliverySink, ItemSource, SourceError};
use crate::models::{Item, Narrative};
use crate::rubric::ScoredResult;
use async_trait::async_trait;

/// Fails every call with [`SourceError::NotConfigured`]
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredSource;

fn not_configured() -> SourceError {
    SourceError::NotConfigured("item source not configured".to_string())
}

#[async_trait]
impl ItemSource for UnconfiguredSource {
    async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<Item>, SourceError> {
        Err(not_configured())
    }

    async fn get(&self, _item_key: &str) -> Result<Item, SourceError> {
        Err(not_configured())
    }
}

#[async_trait]
impl DeliverySink for UnconfiguredSource {
    async fn deliver(&self, _item: &Item, _scored: &ScoredResult, _narrative: &Narrative) -> Result<(), SourceError> {
        Err(not_configured())
    }
}
