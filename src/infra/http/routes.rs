use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::info;

use super::EdgeState;
use super::error::ApiError;
use crate::application::{Freshness, ServeSource};
use crate::bus::{EventType, InvalidationEvent, Priority};
use crate::collector::MetricsSnapshot;
use crate::origin::Content;

const SOURCE: &str = "infra::http::routes";

#[derive(Debug, Serialize)]
pub(super) struct ContentResponse {
    success: bool,
    data: Value,
    source: ServeSource,
    status: Freshness,
    region: String,
    #[serde(
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    cached_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub(super) struct ContentListResponse {
    success: bool,
    data: Vec<Content>,
    region: String,
}

#[derive(Debug, Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    service: &'static str,
    region: String,
    cache: &'static str,
    origin: &'static str,
}

#[derive(Debug, Deserialize)]
pub(super) struct InvalidationRequest {
    #[serde(rename = "type", default = "default_event_type")]
    kind: EventType,
    target: String,
    #[serde(default)]
    version: Option<i64>,
    #[serde(default)]
    priority: Option<Priority>,
}

fn default_event_type() -> EventType {
    EventType::Key
}

#[derive(Debug, Serialize)]
pub(super) struct InvalidationAccepted {
    success: bool,
    topic: String,
    partition: usize,
    receivers: usize,
    event: InvalidationEvent,
}

pub(super) async fn get_content(
    State(state): State<EdgeState>,
    Path(id): Path<String>,
) -> Result<Json<ContentResponse>, ApiError> {
    let served = state
        .handler
        .get_content(&id)
        .await
        .map_err(|err| ApiError::serve(SOURCE, err))?;

    Ok(Json(ContentResponse {
        success: true,
        data: served.data,
        source: served.source,
        status: served.status,
        region: state.region.to_string(),
        cached_at: served.cached_at,
    }))
}

pub(super) async fn list_content(
    State(state): State<EdgeState>,
) -> Result<Json<ContentListResponse>, ApiError> {
    let data = state
        .handler
        .list_content()
        .await
        .map_err(|err| ApiError::serve(SOURCE, err))?;

    Ok(Json(ContentListResponse {
        success: true,
        data,
        region: state.region.to_string(),
    }))
}

pub(super) async fn health(State(state): State<EdgeState>) -> Json<HealthResponse> {
    let health = state.handler.health().await;
    Json(HealthResponse {
        status: "ok",
        service: "edge",
        region: state.region.to_string(),
        cache: if health.cache { "connected" } else { "disconnected" },
        origin: if health.origin { "healthy" } else { "unhealthy" },
    })
}

pub(super) async fn metrics(State(state): State<EdgeState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

pub(super) async fn publish_invalidation(
    State(state): State<EdgeState>,
    payload: Result<Json<InvalidationRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) =
        payload.map_err(|rejection| ApiError::bad_request(SOURCE, rejection.body_text()))?;

    let target = request.target.trim();
    if target.is_empty() {
        return Err(ApiError::bad_request(SOURCE, "target must not be empty"));
    }

    let mut event = match request.kind {
        EventType::Key => InvalidationEvent::key(target),
        EventType::Tag => InvalidationEvent::tag(target),
        EventType::Pattern => InvalidationEvent::pattern(target),
    };
    if let Some(version) = request.version {
        event = event.with_version(version);
    }
    if let Some(priority) = request.priority {
        event = event.with_priority(priority);
    }

    let delivery = state
        .bus
        .publish(&event)
        .map_err(|err| ApiError::publish(SOURCE, &err))?;

    info!(
        target_module = SOURCE,
        region = %state.region,
        event_type = %event.kind,
        target = %event.target,
        partition = delivery.partition,
        receivers = delivery.receivers,
        "Invalidation published"
    );

    let body = InvalidationAccepted {
        success: true,
        topic: state.bus.topic().to_string(),
        partition: delivery.partition,
        receivers: delivery.receivers,
        event,
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}
