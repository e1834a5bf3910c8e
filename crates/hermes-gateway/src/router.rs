//! Axum router wiring.
//!
//! `/api/v1/*` carries the bridge API; `/healthz`, `/readyz` and `/metrics`
//! are for the process supervisor.

use axum::{routing::{delete, get, post}, Router};

use crate::{api, app_state::AppState, ops};

pub fn build_router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/agent/ask", post(api::ask::agent_ask))
        .route("/claude/ask", post(api::ask::claude_ask))
        .route("/n8n/trigger", post(api::ask::workflow_trigger))
        .route("/n8n/webhook-receiver", post(api::ask::workflow_callback))
        .route("/events", post(api::events::submit))
        .route("/events/pending", get(api::events::pending))
        .route("/events/delivered", delete(api::events::purge_delivered))
        .route("/health", get(api::admin::health))
        .route("/stats", get(api::admin::stats))
        .route("/sessions", get(api::admin::sessions))
        .route("/policy", get(api::admin::policy));

    Router::new()
        .nest("/api/v1", v1)
        .route("/healthz", get(ops::healthz))
        .route("/readyz", get(ops::readyz))
        .route("/metrics", get(ops::metrics))
        .with_state(state)
}
