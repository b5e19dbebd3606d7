//! issuegrade-service library interface
//!
//! Rubric scoring, revision tracking and batch analysis jobs behind an
//! HTTP + SSE API. Exposed as a library for integration testing.

pub mod analysis;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod fingerprint;
pub mod jobs;
pub mod models;
pub mod rubric;
pub mod source;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use crate::analysis::AnalysisService;
use crate::fingerprint::FingerprintTracker;
use crate::jobs::JobRunner;
use crate::rubric::RubricConfig;
use crate::source::{Critic, DeliverySink, ItemSource, RubricCritic, UnconfiguredSource};
use axum::Router;
use chrono::{DateTime, Utc};
use issuegrade_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;

/// External collaborators injected into the analysis pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ItemSource>,
    pub critic: Arc<dyn Critic>,
    pub sink: Arc<dyn DeliverySink>,
}

impl Collaborators {
    /// No tracker configured: fetching and delivery report "not configured"
    pub fn unconfigured() -> Self {
        Self {
            source: Arc::new(UnconfiguredSource),
            critic: Arc::new(RubricCritic),
            sink: Arc::new(UnconfiguredSource),
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Subscription-indexed event fan-out
    pub event_bus: EventBus,
    pub tracker: FingerprintTracker,
    pub analysis: AnalysisService,
    pub runner: JobRunner,
    /// `max_items` for requests that do not set one
    pub default_max_items: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, collaborators: Collaborators, rubric: RubricConfig) -> Self {
        let tracker = FingerprintTracker::new(db.clone());
        let analysis = AnalysisService::new(
            tracker.clone(),
            event_bus.clone(),
            collaborators.source,
            collaborators.critic,
            collaborators.sink,
            rubric,
        );
        let runner = JobRunner::new(db.clone(), analysis.clone());

        Self {
            db,
            event_bus,
            tracker,
            analysis,
            runner,
            default_max_items: models::JobOptions::default().max_items,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_default_max_items(mut self, max_items: usize) -> Self {
        self.default_max_items = max_items;
        self
    }

    /// Remember an error for `/health`
    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::job_routes())
        .merge(api::item_routes())
        .merge(api::event_routes())
        .merge(api::health_routes())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
