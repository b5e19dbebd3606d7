//! Per-item analysis pipeline
//!
//! Shared by batch jobs and single-item analysis:
//! evaluate → `item_scored` → critique → record → optional delivery →
//! `item_complete`.

use crate::fingerprint::FingerprintTracker;
use crate::models::{FeedbackRecord, Item, JobOptions, Narrative, RecordDetails};
use crate::rubric::{evaluate, RubricConfig, ScoredResult};
use crate::source::{Critic, DeliverySink, ItemSource, RubricCritic, SourceError};
use issuegrade_common::events::{ActivityLevel, EventBus, EventPayload};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Assessment text in events is cut to this many characters
const EVENT_ASSESSMENT_CHARS: usize = 100;

/// Errors from one run of the item pipeline
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Storage(#[from] issuegrade_common::Error),
}

/// Where item events go: a job's subscribers or the owner's feed
#[derive(Debug, Clone, Copy)]
pub struct EventTarget<'a> {
    pub owner_id: &'a str,
    pub job_id: Option<&'a str>,
}

impl<'a> EventTarget<'a> {
    pub fn job(owner_id: &'a str, job_id: &'a str) -> Self {
        Self {
            owner_id,
            job_id: Some(job_id),
        }
    }

    pub fn owner(owner_id: &'a str) -> Self {
        Self {
            owner_id,
            job_id: None,
        }
    }

    fn job_id(&self) -> Option<String> {
        self.job_id.map(str::to_string)
    }
}

/// Result of one successfully analysed item
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub scored: ScoredResult,
    pub narrative: Narrative,
    pub record: FeedbackRecord,
    /// Whether feedback was delivered in this run
    pub delivered: bool,
}

/// Scoring, narrative, persistence and delivery for items
#[derive(Clone)]
pub struct AnalysisService {
    tracker: FingerprintTracker,
    event_bus: EventBus,
    source: Arc<dyn ItemSource>,
    critic: Arc<dyn Critic>,
    sink: Arc<dyn DeliverySink>,
    rubric: Arc<RubricConfig>,
}

impl AnalysisService {
    pub fn new(
        tracker: FingerprintTracker,
        event_bus: EventBus,
        source: Arc<dyn ItemSource>,
        critic: Arc<dyn Critic>,
        sink: Arc<dyn DeliverySink>,
        rubric: RubricConfig,
    ) -> Self {
        Self {
            tracker,
            event_bus,
            source,
            critic,
            sink,
            rubric: Arc::new(rubric),
        }
    }

    pub fn tracker(&self) -> &FingerprintTracker {
        &self.tracker
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn source(&self) -> &Arc<dyn ItemSource> {
        &self.source
    }

    /// Rubric used when a request carries no override
    pub fn default_rubric(&self) -> &RubricConfig {
        &self.rubric
    }

    /// Send an event to a job's subscribers or, without a job, to the owner
    pub async fn publish(&self, target: EventTarget<'_>, payload: EventPayload) -> usize {
        match target.job_id {
            Some(job_id) => self.event_bus.publish_to_job(job_id, payload).await,
            None => self.event_bus.publish_to_owner(target.owner_id, payload).await,
        }
    }

    /// Fetch one item and run it through the pipeline
    ///
    /// Events go to the owner with `job_id = null`. Unlike batch jobs, any
    /// error is returned to the caller.
    pub async fn analyze_item(
        &self,
        owner_id: &str,
        item_key: &str,
        options: &JobOptions,
    ) -> Result<ItemOutcome, AnalysisError> {
        options.validate()?;
        let item = self.source.get(item_key).await?;
        let rubric = options.rubric.as_ref().unwrap_or(self.rubric.as_ref());

        let outcome = self
            .process_item(EventTarget::owner(owner_id), &item, rubric, options)
            .await?;

        info!(
            item_key = %item.key,
            score = outcome.scored.overall_score,
            revision = outcome.record.revision_number,
            "Item analyzed"
        );
        Ok(outcome)
    }

    /// Run one already-fetched item through the pipeline
    pub async fn process_item(
        &self,
        target: EventTarget<'_>,
        item: &Item,
        rubric: &RubricConfig,
        options: &JobOptions,
    ) -> Result<ItemOutcome, AnalysisError> {
        self.publish(
            target,
            EventPayload::ItemStarted {
                job_id: target.job_id(),
                item_key: item.key.clone(),
                summary: item.summary.clone(),
            },
        )
        .await;

        let scored = evaluate(item, rubric);
        let breakdown = scored.breakdown();
        debug!(item_key = %item.key, score = scored.overall_score, "Item scored");

        self.publish(
            target,
            EventPayload::ItemScored {
                job_id: target.job_id(),
                item_key: item.key.clone(),
                score: scored.overall_score,
                findings_breakdown: breakdown.clone(),
            },
        )
        .await;

        let narrative = match self.critic.critique(item, &scored).await {
            Ok(narrative) => narrative,
            Err(e) => {
                warn!(
                    item_key = %item.key,
                    critic = self.critic.name(),
                    error = %e,
                    "Critic failed, using rubric narrative"
                );
                RubricCritic::narrate(&scored)
            }
        };

        let findings = serde_json::to_value(&breakdown).map_err(|e| {
            issuegrade_common::Error::Internal(format!("Serialize findings failed: {}", e))
        })?;
        let details = RecordDetails {
            passing_threshold: rubric.passing_threshold,
            emoji: narrative.emoji.clone(),
            assessment: narrative.assessment.clone(),
            findings,
        };
        let record = self
            .tracker
            .record(&item.key, &scored.fingerprint, scored.overall_score, &details)
            .await?;

        let delivered = if options.should_deliver() {
            self.deliver(target, item, &scored, &narrative).await
        } else {
            false
        };

        self.publish(
            target,
            EventPayload::ItemComplete {
                job_id: target.job_id(),
                item_key: item.key.clone(),
                score: scored.overall_score,
                emoji: narrative.emoji.clone(),
                assessment: narrative.assessment.chars().take(EVENT_ASSESSMENT_CHARS).collect(),
            },
        )
        .await;

        Ok(ItemOutcome {
            scored,
            narrative,
            record,
            delivered,
        })
    }

    /// Deliver through the sink unless this content was already delivered
    ///
    /// Failures are reported as owner activity and never fail the item.
    async fn deliver(
        &self,
        target: EventTarget<'_>,
        item: &Item,
        scored: &ScoredResult,
        narrative: &Narrative,
    ) -> bool {
        let sink = self.sink.clone();
        let result = self
            .tracker
            .deliver_if_changed(&item.key, &scored.fingerprint, || async move {
                sink.deliver(item, scored, narrative).await
            })
            .await;

        let (delivered, kind, message, level) = match result {
            Ok(true) => (
                true,
                "feedback_delivered",
                format!("Feedback posted to {}", item.key),
                ActivityLevel::Success,
            ),
            Ok(false) => {
                debug!(item_key = %item.key, "Content unchanged since last delivery");
                return false;
            }
            Err(e) => {
                warn!(item_key = %item.key, error = %e, "Feedback delivery failed");
                (
                    false,
                    "delivery_failed",
                    format!("Could not post feedback to {}: {}", item.key, e),
                    ActivityLevel::Warning,
                )
            }
        };

        self.event_bus
            .publish_to_owner(
                target.owner_id,
                EventPayload::Activity {
                    kind: kind.to_string(),
                    message,
                    level,
                    item_key: Some(item.key.clone()),
                },
            )
            .await;
        delivered
    }
}
