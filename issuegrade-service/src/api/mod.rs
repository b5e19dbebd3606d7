//! HTTP API handlers for issuegrade-service
//!
//! JSON REST for jobs and items, SSE for live events.

pub mod health;
pub mod items;
pub mod jobs;
pub mod sse;

pub use health::health_routes;
pub use items::item_routes;
pub use jobs::job_routes;
pub use sse::event_routes;

use crate::ApiError;
use axum::{async_trait, extract::FromRequestParts, extract::Query, http::request::Parts};
use serde::Deserialize;

/// Header carrying the caller's opaque owner id
pub const OWNER_HEADER: &str = "x-owner-id";

/// Caller identity from `X-Owner-Id`, or `?owner_id=` for clients that
/// cannot set headers (browser `EventSource`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerId(pub String);

#[derive(Deserialize)]
struct OwnerQuery {
    owner_id: Option<String>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for OwnerId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let from_header = parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let owner = match from_header {
            Some(owner) => Some(owner),
            None => Query::<OwnerQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.owner_id)
                .filter(|v| !v.trim().is_empty()),
        };

        owner
            .map(OwnerId)
            .ok_or_else(|| ApiError::BadRequest("Missing X-Owner-Id header".to_string()))
    }
}
