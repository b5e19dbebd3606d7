//! Test Helper Utilities
//!
//! Shared utilities for testing issuegrade-service

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;

#[allow(unused_imports)]
pub use db_utils::{fail_inserts_for, test_pool};
#[allow(unused_imports)]
pub use fakes::{FailingCritic, FakeSource, GatedCritic, RecordingSink};

use issuegrade_common::events::{AnalysisEvent, EventBus};
use issuegrade_service::models::{Item, Job};
use issuegrade_service::rubric::RubricConfig;
use issuegrade_service::source::{Critic, RubricCritic};
use issuegrade_service::{AppState, Collaborators};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Item that scores well under the default rubric
pub fn good_item(key: &str) -> Item {
    Item::new(
        key,
        "Add password reset endpoint",
        "Users who forgot their password need a way to regain access to their account. \
         Implement a reset endpoint that sends a one-time link by email and expires after an hour. \
         Acceptance criteria: given a registered email when reset is requested then a link is sent. \
         Out of scope: SMS based reset.",
    )
    .with_labels(["backend"])
    .with_estimate(3.0)
}

/// Item that scores poorly under the default rubric
pub fn poor_item(key: &str) -> Item {
    Item::new(key, "stuff", "")
}

pub fn items(keys: &[&str]) -> Vec<Item> {
    keys.iter().map(|k| good_item(k)).collect()
}

/// App state over a fake source, the given critic and a recording sink
pub fn test_state(
    pool: sqlx::SqlitePool,
    source: FakeSource,
    critic: Arc<dyn Critic>,
    sink: Arc<RecordingSink>,
) -> AppState {
    AppState::new(
        pool,
        EventBus::new(256),
        Collaborators {
            source: Arc::new(source),
            critic,
            sink,
        },
        RubricConfig::default(),
    )
}

/// State with the rubric critic and a sink that records deliveries
pub async fn simple_state(source: FakeSource) -> (AppState, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let state = test_state(test_pool().await, source, Arc::new(RubricCritic), sink.clone());
    (state, sink)
}

/// Poll until the job reaches a terminal state
pub async fn wait_for_terminal(state: &AppState, job_id: &str) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = issuegrade_service::db::jobs::load_job(&state.db, job_id)
            .await
            .expect("job query should succeed")
            .expect("job should exist");
        if job.is_terminal() {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not finish, status {}",
            job_id,
            job.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive events until a terminal job event arrives
pub async fn collect_until_terminal(rx: &mut mpsc::Receiver<AnalysisEvent>) -> Vec<AnalysisEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for events")
            .expect("event channel closed");
        let terminal = event.payload.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

pub fn event_types(events: &[AnalysisEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}
