//! Fake collaborators for the analysis pipeline

use async_trait::async_trait;
use issuegrade_service::models::{Item, Narrative};
use issuegrade_service::rubric::ScoredResult;
use issuegrade_service::source::{Critic, DeliverySink, ItemSource, RubricCritic, SourceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// In-memory item source
#[derive(Debug, Clone, Default)]
pub struct FakeSource {
    pub items: Vec<Item>,
    /// When set, `search` fails with this message
    pub search_error: Option<String>,
}

impl FakeSource {
    pub fn with_items(items: Vec<Item>) -> Self {
        Self {
            items,
            search_error: None,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            items: Vec::new(),
            search_error: Some(message.to_string()),
        }
    }
}

#[async_trait]
impl ItemSource for FakeSource {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<Item>, SourceError> {
        if let Some(message) = &self.search_error {
            return Err(SourceError::Network(message.clone()));
        }
        Ok(self.items.iter().take(max_results).cloned().collect())
    }

    async fn get(&self, item_key: &str) -> Result<Item, SourceError> {
        self.items
            .iter()
            .find(|i| i.key == item_key)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(format!("Issue not found: {}", item_key)))
    }
}

/// Critic that always errors
#[derive(Debug, Default)]
pub struct FailingCritic;

#[async_trait]
impl Critic for FailingCritic {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn critique(&self, _item: &Item, _scored: &ScoredResult) -> Result<Narrative, SourceError> {
        Err(SourceError::Api {
            status: 503,
            message: "model overloaded".to_string(),
        })
    }
}

/// Critic that parks the first call until released
#[derive(Debug, Default)]
pub struct GatedCritic {
    pub entered: Notify,
    pub release: Notify,
    calls: AtomicUsize,
}

impl GatedCritic {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Critic for GatedCritic {
    fn name(&self) -> &'static str {
        "gated"
    }

    async fn critique(&self, _item: &Item, scored: &ScoredResult) -> Result<Narrative, SourceError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.notify_one();
            self.release.notified().await;
        }
        Ok(RubricCritic::narrate(scored))
    }
}

/// Sink that records delivered keys, optionally failing every call
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingSink {
    pub fn failing() -> Self {
        Self {
            delivered: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, item: &Item, _scored: &ScoredResult, _narrative: &Narrative) -> Result<(), SourceError> {
        if self.fail {
            return Err(SourceError::Api {
                status: 500,
                message: "comment rejected".to_string(),
            });
        }
        self.delivered.lock().unwrap().push(item.key.clone());
        Ok(())
    }
}
