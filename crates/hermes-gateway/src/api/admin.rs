//! Health, usage stats, sessions and the live policy snapshot.

use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app_state::AppState;
use crate::storage::sessions::SESSION_LIST_LIMIT;

use super::response::ApiResult;

/// Dependency map; `degraded` whenever the store or the workers are unwell.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let now = state.clock().now();
    let store_ok = match state.store().ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "health: store unreachable");
            false
        }
    };

    let workers = state.workers();
    let poll = Duration::from_millis(state.cfg().delivery.poll_interval_ms);
    let live = workers.live_workers(now, poll);
    let workers_ok = live == workers.worker_count();

    let snapshot = state.engine().snapshot();
    let registry = state.registry();
    let healthy = store_ok && workers_ok && !state.is_draining();

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "store": if store_ok { "connected" } else { "unavailable" },
        "workers": {
            "configured": workers.worker_count(),
            "live": live,
            "last_heartbeat": workers.last_beat(),
        },
        "agents": registry.agent_ids(),
        "coordinator": if registry.coordinator().is_some() { "registered" } else { "absent" },
        "policy_generation": snapshot.generation,
        "quiet_hours_active": snapshot.quiet_hours_active(now),
        "rate_limit_backend": state.engine().counter().backend(),
        "draining": state.is_draining(),
    }))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let now = state.clock().now();
    let snapshot = state.engine().snapshot();
    let usage = state.store().usage_stats(now).await?;
    let outbox = state.outbox().counts().await?;
    let global_count = state.engine().counter().window_count(None, snapshot.window_ms(), now).await?;

    Ok(Json(json!({
        "last_hour_by_caller": usage.last_hour,
        "last_24h": usage.last_24h,
        "outbox": outbox,
        "rate_window": {
            "window_secs": snapshot.document.window_secs,
            "global_count": global_count,
            "global_quota": snapshot.global_quota(),
        },
    })))
}

/// Most recently used sessions first.
pub async fn sessions(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let sessions = state.store().list_sessions(SESSION_LIST_LIMIT).await?;
    Ok(Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    })))
}

pub async fn policy(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.engine().snapshot();
    Json(json!({
        "generation": snapshot.generation,
        "loaded_at": snapshot.loaded_at,
        "policy": snapshot.document,
    }))
}
