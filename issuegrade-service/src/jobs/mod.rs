//! Batch analysis jobs
//!
//! [`JobRunner`] owns job submission, lookup and cancellation. Each job runs
//! in its own tokio task; a supervisor task awaits its `JoinHandle` and
//! turns errors and panics into a `failed` job.

mod runner;

use crate::analysis::AnalysisService;
use crate::db::jobs;
use crate::models::{Job, JobOptions, JobStatus};
use issuegrade_common::events::EventPayload;
use issuegrade_common::{Error, Result};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default page size for job listings
pub const DEFAULT_LIST_LIMIT: u32 = 50;

/// Job lifecycle manager
#[derive(Clone)]
pub struct JobRunner {
    pool: SqlitePool,
    analysis: AnalysisService,
    /// In-process fast path for cancellation, one token per live job
    cancellation_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl JobRunner {
    pub fn new(pool: SqlitePool, analysis: AnalysisService) -> Self {
        Self {
            pool,
            analysis,
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Persist a pending job and start it in the background
    pub async fn create(&self, owner_id: &str, query: &str, options: JobOptions) -> Result<Job> {
        let query = query.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        options.validate()?;

        let job = Job::new(owner_id, query, options);
        jobs::insert_job(&self.pool, &job).await?;
        self.analysis.event_bus().bind_job(&job.job_id, &job.owner_id);

        let token = CancellationToken::new();
        self.cancellation_tokens
            .write()
            .await
            .insert(job.job_id.clone(), token.clone());

        info!(
            job_id = %job.job_id,
            owner_id = %job.owner_id,
            query = %job.query,
            max_items = job.options.max_items,
            "Analysis job created"
        );

        self.spawn_supervised(job.clone(), token);
        Ok(job)
    }

    fn spawn_supervised(&self, job: Job, token: CancellationToken) {
        let job_id = job.job_id.clone();
        let handle = tokio::spawn(runner::execute(self.clone(), job, token));

        let supervisor = self.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(())) => {
                    info!(job_id = %job_id, "Job task finished");
                }
                Ok(Err(e)) => {
                    error!(job_id = %job_id, error = %format!("{:#}", e), "Job failed");
                    supervisor.fail(&job_id, &format!("{:#}", e)).await;
                }
                Err(join_error) => {
                    let reason = if join_error.is_panic() {
                        "job task panicked"
                    } else {
                        "job task was aborted"
                    };
                    error!(job_id = %job_id, reason, "Job task did not finish");
                    supervisor.fail(&job_id, reason).await;
                }
            }
            supervisor.finish(&job_id).await;
        });
    }

    /// Mark a job failed (if still live) and tell its subscribers
    async fn fail(&self, job_id: &str, message: &str) {
        match jobs::fail_job(&self.pool, job_id, message).await {
            Ok(true) => {
                self.analysis
                    .event_bus()
                    .publish_to_job(
                        job_id,
                        EventPayload::JobFailed {
                            job_id: job_id.to_string(),
                            error: message.to_string(),
                        },
                    )
                    .await;
            }
            Ok(false) => {
                warn!(job_id, "Job already terminal, failure not recorded");
            }
            Err(e) => {
                error!(job_id, error = %e, "Failed to persist job failure");
            }
        }
    }

    /// Drop the job's token and detach its subscriptions
    async fn finish(&self, job_id: &str) {
        self.cancellation_tokens.write().await.remove(job_id);
        self.analysis.event_bus().cleanup_job(job_id);
    }

    /// Load one of `owner_id`'s jobs; another owner's job is `NotFound`
    pub async fn get(&self, owner_id: &str, job_id: &str) -> Result<Job> {
        jobs::load_owned_job(&self.pool, owner_id, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Job not found: {}", job_id)))
    }

    /// Most recent jobs of one owner, newest first
    pub async fn list(&self, owner_id: &str, limit: u32) -> Result<Vec<Job>> {
        jobs::list_jobs(&self.pool, owner_id, limit).await
    }

    /// Cancel a pending or running job
    ///
    /// A job in a terminal state yields `Conflict`; an unknown id or
    /// another owner's job `NotFound`.
    pub async fn cancel(&self, owner_id: &str, job_id: &str) -> Result<Job> {
        if !jobs::cancel_job(&self.pool, owner_id, job_id).await? {
            let job = self.get(owner_id, job_id).await?;
            return Err(Error::Conflict(format!(
                "Job {} is already {}",
                job_id, job.status
            )));
        }

        if let Some(token) = self.cancellation_tokens.read().await.get(job_id) {
            token.cancel();
        }
        info!(job_id, owner_id, "Job cancellation requested");

        self.get(owner_id, job_id).await
    }

    /// Fail jobs a previous process left pending or running
    pub async fn recover_stale_jobs(&self) -> Result<u64> {
        let recovered = jobs::recover_stale_jobs(&self.pool).await?;
        if recovered > 0 {
            warn!(recovered, "Marked interrupted jobs as failed");
        }
        Ok(recovered)
    }

    /// Number of jobs with a live task
    pub async fn active_jobs(&self) -> usize {
        self.cancellation_tokens.read().await.len()
    }

    /// Whether a job has been cancelled, by token or by persisted status
    async fn is_cancelled(&self, job_id: &str, token: &CancellationToken) -> Result<bool> {
        if token.is_cancelled() {
            return Ok(true);
        }
        Ok(jobs::load_status(&self.pool, job_id).await? == Some(JobStatus::Cancelled))
    }
}
