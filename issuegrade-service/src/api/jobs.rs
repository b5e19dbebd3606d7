//! Batch job endpoints

use super::OwnerId;
use crate::jobs::DEFAULT_LIST_LIMIT;
use crate::models::{Job, JobOptions};
use crate::rubric::RubricConfig;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// POST /jobs request
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// Item source query (JQL for Jira)
    pub query: String,
    /// Defaults to the service's `jobs.default_max_items`
    pub max_items: Option<usize>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub post_comment: bool,
    #[serde(default)]
    pub notify: bool,
    pub rubric: Option<RubricConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobView>,
}

/// Job snapshot plus derived progress
#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub job: Job,
    pub percent: f64,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            percent: job.percent(),
            job,
        }
    }
}

/// POST /jobs
///
/// Persists the job as `pending` and starts it in the background.
pub async fn create_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    let options = JobOptions {
        max_items: request.max_items.unwrap_or(state.default_max_items),
        dry_run: request.dry_run,
        post_comment: request.post_comment,
        notify: request.notify,
        rubric: request.rubric,
    };

    let job = state.runner.create(&owner_id, &request.query, options).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

/// GET /jobs?limit=
pub async fn list_jobs(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<Json<JobListResponse>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);
    let jobs = state.runner.list(&owner_id, limit).await?;
    Ok(Json(JobListResponse {
        jobs: jobs.into_iter().map(JobView::from).collect(),
    }))
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job = state.runner.get(&owner_id, &job_id).await?;
    tracing::debug!(job_id = %job_id, status = %job.status, "Status query");
    Ok(Json(job.into()))
}

/// POST /jobs/:job_id/cancel
///
/// 409 when the job already reached a terminal state, 404 when it
/// belongs to another owner.
pub async fn cancel_job(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let job = state.runner.cancel(&owner_id, &job_id).await?;
    Ok(Json(job.into()))
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
}
