//! Single-item analysis and revision history endpoints

use super::OwnerId;
use crate::models::{FeedbackRecord, JobOptions, Narrative, RevisionSummary};
use crate::error::ApiError;
use crate::rubric::RubricConfig;
use crate::{ApiResult, AppState};
use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use issuegrade_common::events::FindingSummary;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// POST /items/:item_key/analyze request (body optional)
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalyzeRequest {
    pub dry_run: bool,
    pub post_comment: bool,
    pub rubric: Option<RubricConfig>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub item_key: String,
    pub score: f64,
    pub fingerprint: String,
    pub revision_number: i64,
    pub is_passing: bool,
    pub delivered: bool,
    pub narrative: Narrative,
    pub findings_breakdown: BTreeMap<String, FindingSummary>,
}

#[derive(Debug, Serialize)]
pub struct RevisionsResponse {
    pub summary: RevisionSummary,
    pub records: Vec<FeedbackRecord>,
}

/// POST /items/:item_key/analyze
///
/// Errors are returned to the caller (no isolation as in batch jobs).
pub async fn analyze_item(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Path(item_key): Path<String>,
    body: Bytes,
) -> ApiResult<Json<AnalyzeResponse>> {
    let request = parse_analyze_request(&body)?;
    let options = JobOptions {
        max_items: 1,
        dry_run: request.dry_run,
        post_comment: request.post_comment,
        notify: false,
        rubric: request.rubric,
    };

    let outcome = state.analysis.analyze_item(&owner_id, &item_key, &options).await?;

    Ok(Json(AnalyzeResponse {
        item_key: outcome.record.item_key.clone(),
        score: outcome.scored.overall_score,
        fingerprint: outcome.scored.fingerprint.clone(),
        revision_number: outcome.record.revision_number,
        is_passing: outcome.record.is_passing,
        delivered: outcome.delivered,
        findings_breakdown: outcome.scored.breakdown(),
        narrative: outcome.narrative,
    }))
}

/// Empty body means defaults; anything else must be a valid request
fn parse_analyze_request(body: &[u8]) -> ApiResult<AnalyzeRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(AnalyzeRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid request body: {}", e)))
}

/// GET /items/:item_key/revisions
pub async fn get_revisions(
    State(state): State<AppState>,
    Path(item_key): Path<String>,
) -> ApiResult<Json<RevisionsResponse>> {
    let summary = state.tracker.revision_summary(&item_key).await?;
    let records = state.tracker.history(&item_key).await?;
    Ok(Json(RevisionsResponse { summary, records }))
}

pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/items/:item_key/analyze", post(analyze_item))
        .route("/items/:item_key/revisions", get(get_revisions))
}
