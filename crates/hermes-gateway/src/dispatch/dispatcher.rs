use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{info_span, Instrument};

use hermes_core::clock::Clock;
use hermes_core::error::{BridgeError, Result};
use hermes_core::model::{session_id, Admission, Message, Priority, Reply, Target};

use crate::audit::AuditLogger;
use crate::obs::BridgeMetrics;
use crate::policy::PolicyEngine;
use crate::storage::{AuditRecord, Decision, SqliteStore};

use super::registry::{AgentRegistry, Inbox, InboxRequest};
use super::workflow::WorkflowDispatch;

const SUMMARY_CHARS: usize = 200;
const DEFAULT_PURPOSE: &str = "general";
const CANCELLED: &str = "cancelled";

/// One synchronous call as received at the boundary.
#[derive(Debug, Clone)]
pub struct SyncCall {
    pub endpoint: &'static str,
    pub caller_id: String,
    pub target: Target,
    pub body: Value,
    pub priority: Priority,
    pub purpose: Option<String>,
}

/// A target bound to its live dispatch capability.
enum Route {
    Inbox(Inbox),
    Workflow(String),
}

/// Synchronous path: resolve, admit, dispatch, audit.
pub struct Dispatcher {
    engine: Arc<PolicyEngine>,
    registry: Arc<AgentRegistry>,
    workflow: WorkflowDispatch,
    audit: AuditLogger,
    sessions: SqliteStore,
    metrics: Arc<BridgeMetrics>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<PolicyEngine>,
        registry: Arc<AgentRegistry>,
        workflow: WorkflowDispatch,
        audit: AuditLogger,
        sessions: SqliteStore,
        metrics: Arc<BridgeMetrics>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self { engine, registry, workflow, audit, sessions, metrics, clock, timeout }
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    /// Every call, admitted or denied, yields exactly one audit record,
    /// including calls whose future is dropped before they finish.
    pub async fn deliver_sync(&self, call: SyncCall) -> Result<Reply> {
        let now = self.clock.now();
        let snapshot = self.engine.snapshot();
        let kind = call.target.kind();
        let mut slot = AuditSlot::open(
            &self.audit,
            &self.metrics,
            kind,
            AuditRecord {
                caller_id: call.caller_id.clone(),
                endpoint: call.endpoint.to_string(),
                target: call.target.label(),
                priority: call.priority.as_str().to_string(),
                decision: Decision::Denied,
                reason: None,
                success: false,
                error: None,
                latency_ms: 0,
                cost_usd: 0.0,
                request_summary: summarize(&call.body),
                generation: snapshot.generation,
                created_at: now,
            },
        );

        // Resolution first: an unknown target never consumes quota.
        let route = match self.resolve(&call.target) {
            Ok(r) => r,
            Err(e) => return Err(self.deny(slot, "unknown_target", e)),
        };

        let admission = match self.engine.admit_with(&snapshot, &call.caller_id, call.priority, now).await {
            Ok(a) => a,
            Err(e) => return Err(self.deny(slot, "admission_error", e)),
        };
        if let Admission::Deny { reason, .. } = admission {
            let label = reason.as_str();
            return Err(self.deny(slot, label, reason.into()));
        }
        self.metrics.admissions.inc(&[("decision", "admitted"), ("reason", "ok")]);
        slot.admitted();

        let purpose = call.purpose.as_deref().filter(|p| !p.trim().is_empty()).unwrap_or(DEFAULT_PURPOSE);
        let message = Message {
            session_id: session_id(&call.caller_id, &call.target, purpose),
            caller: call.caller_id,
            target: call.target,
            body: call.body,
            priority: call.priority,
            timestamp: now,
        };
        let target = slot.target().to_string();
        self.touch_session(&message, &target).await;

        let span = info_span!(
            "deliver_sync",
            caller = %message.caller,
            target = %target,
            priority = %message.priority,
            session = %message.session_id,
        );
        let outcome = match tokio::time::timeout(self.timeout, self.dispatch(route, message).instrument(span)).await {
            Ok(r) => r,
            Err(_) => Err(BridgeError::Timeout(self.timeout.as_millis() as u64)),
        };

        self.metrics.dispatch_duration.observe(&[("target", kind)], slot.started.elapsed());
        match &outcome {
            Ok(reply) => {
                let cost = reply.cost_usd.unwrap_or(0.0);
                slot.commit(|rec| {
                    rec.success = true;
                    rec.cost_usd = cost;
                    tracing::info!(caller = %rec.caller_id, target = %rec.target, latency_ms = rec.latency_ms, "dispatched");
                });
            }
            Err(e) => {
                self.metrics.dispatch_errors.inc(&[("target", kind), ("code", e.client_code().as_str())]);
                slot.commit(|rec| {
                    rec.error = Some(e.to_string());
                    tracing::warn!(caller = %rec.caller_id, target = %rec.target, error = %e, "dispatch failed");
                });
            }
        }
        outcome
    }

    /// Workflow calls share one session id per path family, so only
    /// agent and coordinator conversations are tracked.
    async fn touch_session(&self, message: &Message, target: &str) {
        if matches!(message.target, Target::Workflow(_)) {
            return;
        }
        let kind = message.target.kind();
        if let Err(e) = self
            .sessions
            .touch_session(&message.session_id, &message.caller, target, kind, message.timestamp)
            .await
        {
            tracing::warn!(error = %e, session = %message.session_id, "session bookkeeping failed");
        }
    }

    fn resolve(&self, target: &Target) -> Result<Route> {
        match target {
            Target::Agent(id) => self
                .registry
                .get(id)
                .map(Route::Inbox)
                .ok_or_else(|| BridgeError::UnknownTarget(format!("agent {id} has no live channel"))),
            Target::Claude => self
                .registry
                .coordinator()
                .map(Route::Inbox)
                .ok_or_else(|| BridgeError::UnknownTarget("coordinator channel not registered".into())),
            Target::Workflow(path) => self.workflow.resolve(path).map(Route::Workflow),
        }
    }

    async fn dispatch(&self, route: Route, message: Message) -> Result<Reply> {
        match route {
            Route::Inbox(inbox) => {
                let kind = message.target.kind();
                self.metrics.inbox_in_flight.inc(&[("target", kind)]);
                let _guard = InFlight { metrics: self.metrics.as_ref(), kind };
                let (tx, rx) = oneshot::channel();
                inbox
                    .tx
                    .send(InboxRequest { message, reply: tx })
                    .await
                    .map_err(|_| BridgeError::UnknownTarget("channel closed before delivery".into()))?;
                rx.await.map_err(|_| BridgeError::Upstream("inbox dropped the request without replying".into()))?
            }
            Route::Workflow(url) => self.workflow.call(&url, &message).await,
        }
    }

    fn deny(&self, slot: AuditSlot<'_>, reason: &str, err: BridgeError) -> BridgeError {
        self.metrics.admissions.inc(&[("decision", "denied"), ("reason", reason)]);
        slot.commit(|rec| {
            tracing::info!(caller = %rec.caller_id, target = %rec.target, reason, "call denied");
            rec.decision = Decision::Denied;
            rec.reason = Some(reason.to_string());
            rec.error = Some(err.to_string());
        });
        err
    }
}

/// Holds a call's audit record until it is written. Dropping the slot
/// uncommitted (client gone, task aborted) records the call as cancelled.
struct AuditSlot<'a> {
    audit: &'a AuditLogger,
    metrics: &'a BridgeMetrics,
    kind: &'static str,
    started: Instant,
    rec: Option<AuditRecord>,
}

impl<'a> AuditSlot<'a> {
    fn open(audit: &'a AuditLogger, metrics: &'a BridgeMetrics, kind: &'static str, rec: AuditRecord) -> Self {
        Self { audit, metrics, kind, started: Instant::now(), rec: Some(rec) }
    }

    fn admitted(&mut self) {
        if let Some(rec) = self.rec.as_mut() {
            rec.decision = Decision::Admitted;
        }
    }

    fn target(&self) -> &str {
        self.rec.as_ref().map_or("", |r| r.target.as_str())
    }

    fn commit(mut self, update: impl FnOnce(&mut AuditRecord)) {
        if let Some(mut rec) = self.rec.take() {
            rec.latency_ms = self.started.elapsed().as_millis() as u64;
            update(&mut rec);
            self.audit.record(rec);
        }
    }
}

impl Drop for AuditSlot<'_> {
    fn drop(&mut self) {
        if let Some(mut rec) = self.rec.take() {
            rec.latency_ms = self.started.elapsed().as_millis() as u64;
            rec.error = Some(CANCELLED.to_string());
            self.metrics.dispatch_errors.inc(&[("target", self.kind), ("code", "CANCELLED")]);
            tracing::warn!(caller = %rec.caller_id, target = %rec.target, latency_ms = rec.latency_ms, "call dropped before completion");
            self.audit.record(rec);
        }
    }
}

struct InFlight<'a> {
    metrics: &'a BridgeMetrics,
    kind: &'static str,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.metrics.inbox_in_flight.dec(&[("target", self.kind)]);
    }
}

fn summarize(body: &Value) -> String {
    let text = match body {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    text.chars().take(SUMMARY_CHARS).collect()
}
