//! Synchronous endpoints: agent/claude asks, workflow triggers and callbacks.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use hermes_core::model::{Priority, Reply, Target};

use crate::app_state::AppState;
use crate::context::{callback_caller, normalize_caller_id};
use crate::dispatch::SyncCall;

use super::response::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct AgentAskRequest {
    pub caller_id: String,
    pub target_agent: String,
    pub message: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClaudeAskRequest {
    pub caller_id: String,
    pub message: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub caller_id: String,
    pub workflow_path: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub source_workflow: String,
    /// `"claude"` or an agent id.
    pub target: String,
    pub message: Value,
    #[serde(default)]
    pub priority: Priority,
}

fn answer(reply: Reply, started: Instant) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "response": reply.response,
        "session_id": reply.session_id,
        "cost_usd": reply.cost_usd.unwrap_or(0.0),
        "latency_ms": started.elapsed().as_millis() as u64,
    }))
}

fn agent_target(id: &str) -> ApiResult<Target> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError(hermes_core::BridgeError::BadRequest("target_agent must not be empty".into())));
    }
    Ok(Target::Agent(id.to_string()))
}

pub async fn agent_ask(
    State(state): State<AppState>,
    payload: Result<Json<AgentAskRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let started = Instant::now();
    let call = SyncCall {
        endpoint: "agent/ask",
        caller_id: normalize_caller_id(&req.caller_id)?,
        target: agent_target(&req.target_agent)?,
        body: req.message,
        priority: req.priority,
        purpose: req.purpose,
    };
    let reply = state.dispatcher().deliver_sync(call).await?;
    Ok(answer(reply, started))
}

pub async fn claude_ask(
    State(state): State<AppState>,
    payload: Result<Json<ClaudeAskRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let started = Instant::now();
    let call = SyncCall {
        endpoint: "claude/ask",
        caller_id: normalize_caller_id(&req.caller_id)?,
        target: Target::Claude,
        body: req.message,
        priority: req.priority,
        purpose: req.purpose,
    };
    let reply = state.dispatcher().deliver_sync(call).await?;
    Ok(answer(reply, started))
}

pub async fn workflow_trigger(
    State(state): State<AppState>,
    payload: Result<Json<TriggerRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let started = Instant::now();
    let body = if req.payload.is_null() { json!({}) } else { req.payload };
    let call = SyncCall {
        endpoint: "n8n/trigger",
        caller_id: normalize_caller_id(&req.caller_id)?,
        target: Target::Workflow(req.workflow_path.clone()),
        body,
        priority: req.priority,
        purpose: None,
    };
    let reply = state.dispatcher().deliver_sync(call).await?;
    Ok(Json(json!({
        "status": "triggered",
        "workflow": req.workflow_path,
        "response": reply.response,
        "latency_ms": started.elapsed().as_millis() as u64,
    })))
}

/// A workflow calling back to reach the coordinator or an agent.
pub async fn workflow_callback(
    State(state): State<AppState>,
    payload: Result<Json<CallbackRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let started = Instant::now();
    let caller_id = callback_caller(&req.source_workflow)?;
    let (endpoint, target) = if req.target.trim() == "claude" {
        ("claude/ask", Target::Claude)
    } else {
        ("agent/ask", agent_target(&req.target)?)
    };
    tracing::info!(source = %req.source_workflow, target = %target.label(), "workflow callback");

    let call = SyncCall {
        endpoint,
        caller_id,
        target,
        body: req.message,
        priority: req.priority,
        purpose: Some(format!("n8n-callback-{}", req.source_workflow.trim())),
    };
    let reply = state.dispatcher().deliver_sync(call).await?;
    Ok(answer(reply, started))
}
