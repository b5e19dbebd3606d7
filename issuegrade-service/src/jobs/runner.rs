//! Job task body: fetch, per-item loop, terminal transition

use super::JobRunner;
use crate::analysis::EventTarget;
use crate::db::jobs;
use crate::models::{Job, JobStatus, ScoreSummary};
use crate::rubric::round1;
use anyhow::Context;
use chrono::Utc;
use issuegrade_common::events::{progress_percent, ActivityLevel, EventPayload};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run one job to a terminal state
///
/// Errors returned here are batch-fatal; the supervisor marks the job
/// failed. Cancellation is a normal return.
pub(super) async fn execute(runner: JobRunner, job: Job, token: CancellationToken) -> anyhow::Result<()> {
    let pool = &runner.pool;
    let bus = runner.analysis.event_bus();
    let job_id = job.job_id.as_str();

    if !jobs::mark_running(pool, job_id, Utc::now()).await? {
        // Cancelled while still pending
        if jobs::load_status(pool, job_id).await? == Some(JobStatus::Cancelled) {
            info!(job_id, "Job cancelled before start");
            bus.publish_to_job(
                job_id,
                EventPayload::JobCancelled {
                    job_id: job_id.to_string(),
                    processed: 0,
                    total: 0,
                },
            )
            .await;
        }
        return Ok(());
    }

    let started = Instant::now();
    info!(job_id, query = %job.query, "Job running");

    let items = runner
        .analysis
        .source()
        .search(&job.query, job.options.max_items)
        .await
        .context("Failed to fetch items")?;
    let total = items.len();

    jobs::set_total(pool, job_id, total).await?;
    bus.publish_to_job(
        job_id,
        EventPayload::JobStarted {
            job_id: job_id.to_string(),
            query: job.query.clone(),
            total_items: total,
            dry_run: job.options.dry_run,
        },
    )
    .await;
    info!(job_id, total, "Items fetched");

    let rubric = job
        .options
        .rubric
        .as_ref()
        .unwrap_or(runner.analysis.default_rubric());
    let target = EventTarget::job(&job.owner_id, job_id);

    let mut processed = 0usize;
    let mut failed = 0usize;
    let mut scores = Vec::with_capacity(total);

    for item in &items {
        if runner.is_cancelled(job_id, &token).await? {
            return finish_cancelled(&runner, job_id, processed, total).await;
        }

        jobs::set_current_item(pool, job_id, &item.key).await?;

        match runner
            .analysis
            .process_item(target, item, rubric, &job.options)
            .await
        {
            Ok(outcome) => {
                debug!(job_id, item_key = %item.key, score = outcome.scored.overall_score, "Item complete");
                scores.push(outcome.scored.overall_score);
            }
            Err(e) => {
                failed += 1;
                warn!(job_id, item_key = %item.key, error = %e, "Item failed");
                bus.publish_to_job(
                    job_id,
                    EventPayload::ItemFailed {
                        job_id: Some(job_id.to_string()),
                        item_key: item.key.clone(),
                        error: e.to_string(),
                    },
                )
                .await;
            }
        }

        processed += 1;
        jobs::update_counters(pool, job_id, processed, failed).await?;
        bus.publish_to_job(
            job_id,
            EventPayload::JobProgress {
                job_id: job_id.to_string(),
                current_item: item.key.clone(),
                processed,
                total,
                percent: progress_percent(processed, total),
                failed,
            },
        )
        .await;
    }

    let summary = ScoreSummary::from_scores(&scores);
    if !jobs::complete_job(pool, job_id, summary, Utc::now()).await? {
        // Cancel landed after the last item
        return finish_cancelled(&runner, job_id, processed, total).await;
    }

    let duration_seconds = round1(started.elapsed().as_secs_f64());
    let average_score = summary.map(|s| s.average);
    info!(
        job_id,
        processed,
        failed,
        average_score = ?average_score,
        duration_seconds,
        "Job completed"
    );

    bus.publish_to_job(
        job_id,
        EventPayload::JobCompleted {
            job_id: job_id.to_string(),
            total_processed: processed,
            total_failed: failed,
            average_score,
            duration_seconds,
        },
    )
    .await;

    if job.options.notify {
        let score_text = average_score
            .map(|avg| format!("average score {}", avg))
            .unwrap_or_else(|| "no items scored".to_string());
        bus.publish_to_owner(
            &job.owner_id,
            EventPayload::Activity {
                kind: "job_summary".to_string(),
                message: format!(
                    "Analysis of \"{}\" finished: {} processed, {} failed, {}",
                    job.query, processed, failed, score_text
                ),
                level: if failed > 0 {
                    ActivityLevel::Warning
                } else {
                    ActivityLevel::Success
                },
                item_key: None,
            },
        )
        .await;
    }

    Ok(())
}

async fn finish_cancelled(runner: &JobRunner, job_id: &str, processed: usize, total: usize) -> anyhow::Result<()> {
    jobs::clear_current_item(&runner.pool, job_id).await?;
    info!(job_id, processed, total, "Job cancelled");
    runner
        .analysis
        .event_bus()
        .publish_to_job(
            job_id,
            EventPayload::JobCancelled {
                job_id: job_id.to_string(),
                processed,
                total,
            },
        )
        .await;
    Ok(())
}
