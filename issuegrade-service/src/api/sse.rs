//! Server-Sent Events (SSE) for live analysis events
//!
//! One JSON `AnalysisEvent` per SSE message, SSE event name = event type.

use super::OwnerId;
use crate::{ApiResult, AppState};
use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
    Json, Router,
};
use futures::stream::Stream;
use issuegrade_common::events::{AnalysisEvent, ConnectionId, ConnectionStats, EventBus, EventPayload};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct EventStreamQuery {
    /// Only this job's events; owner-wide feed when absent
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventStatsResponse {
    #[serde(flatten)]
    pub connections: ConnectionStats,
    pub active_jobs: usize,
}

/// Unsubscribes the connection when the SSE stream is dropped
struct ConnectionGuard {
    bus: EventBus,
    id: ConnectionId,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
        debug!(connection = %self.id, "SSE client disconnected");
    }
}

fn to_sse(event: &AnalysisEvent) -> Option<Event> {
    match event.to_json() {
        Ok(json) => Some(Event::default().event(event.event_type()).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event.event_type(), e);
            None
        }
    }
}

/// GET /events?job_id=
///
/// Streams a `connected` event, then every event published to this
/// connection until the client goes away. A `job_id` the caller does not
/// own is 404.
pub async fn event_stream(
    State(state): State<AppState>,
    OwnerId(owner_id): OwnerId,
    Query(query): Query<EventStreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if let Some(job_id) = query.job_id.as_deref() {
        state.runner.get(&owner_id, job_id).await?;
    }

    let (id, mut rx) = state.event_bus.connect(&owner_id, query.job_id.as_deref());
    info!(connection = %id, owner_id = %owner_id, job_id = ?query.job_id, "New SSE client connected");

    let guard = ConnectionGuard {
        bus: state.event_bus.clone(),
        id,
    };
    let connected = AnalysisEvent::now(EventPayload::Connected {
        owner_id,
        job_id: query.job_id,
    });

    let stream = async_stream::stream! {
        let _guard = guard;

        if let Some(event) = to_sse(&connected) {
            yield Ok(event);
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Some(event) => {
                            if let Some(sse_event) = to_sse(&event) {
                                yield Ok(sse_event);
                            }
                        }
                        // Bus dropped this connection
                        None => break,
                    }
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")))
}

/// GET /events/stats
pub async fn event_stats(State(state): State<AppState>) -> ApiResult<Json<EventStatsResponse>> {
    Ok(Json(EventStatsResponse {
        connections: state.event_bus.connection_count(),
        active_jobs: state.runner.active_jobs().await,
    }))
}

pub fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/events", get(event_stream))
        .route("/events/stats", get(event_stats))
}
