//! Event outbox endpoints.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use hermes_core::model::{EventFilter, NewEvent};

use crate::app_state::AppState;

use super::response::ApiResult;

/// Enqueue an event; it is durable once this returns.
pub async fn submit(
    State(state): State<AppState>,
    payload: Result<Json<NewEvent>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(mut event) = payload?;
    event.validate()?;
    if event.payload.is_null() {
        event.payload = json!({});
    }

    let snapshot = state.engine().snapshot();
    let url = snapshot.webhook_for(&event.event_type, &state.cfg().workflow.base_url);
    let event_type = event.event_type.clone();
    let source = event.source.clone();
    let id = state.outbox().enqueue(event, url.clone(), state.clock().now()).await?;

    state.metrics().events_enqueued.inc(&[("event_type", &event_type)]);
    tracing::info!(event_id = %id, event_type = %event_type, source = %source, url = %url, "event queued");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "queued", "event_id": id, "event_type": event_type })),
    ))
}

pub async fn pending(
    State(state): State<AppState>,
    query: Result<Query<EventFilter>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(filter) = query?;
    let events = state.outbox().list_pending(&filter).await?;
    Ok(Json(json!({ "count": events.len(), "events": events })))
}

pub async fn purge_delivered(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let removed = state.outbox().delete_delivered().await?;
    tracing::info!(removed, "delivered events purged");
    Ok(Json(json!({ "removed_count": removed })))
}
