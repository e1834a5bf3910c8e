//! Outbox drain loop.
//!
//! Each tick leases due partition heads, posts them to their webhook and
//! settles the row through the outbox CAS transitions. A worker only ever
//! completes rows it still holds the lease for.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use hermes_core::clock::Clock;
use hermes_core::error::Result;
use hermes_core::model::{Event, EventStatus};

use crate::config::DeliverySection;
use crate::obs::BridgeMetrics;
use crate::storage::Outbox;
use crate::webhook::{WebhookClient, WebhookError};

use super::alert::{Alert, Alerter};
use super::retry::{to_chrono, RetryPolicy};

pub const EVENT_ID_HEADER: &str = "X-Hermes-Event-Id";
pub const ATTEMPT_HEADER: &str = "X-Hermes-Attempt";

/// Per-worker tuning taken from the `delivery` config section.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub lease: Duration,
    pub request_timeout: Duration,
}

impl WorkerSettings {
    pub fn from_config(cfg: &DeliverySection) -> Self {
        Self {
            batch_size: cfg.batch_size,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            lease: Duration::from_millis(cfg.lease_ms),
            request_timeout: Duration::from_millis(cfg.request_timeout_ms),
        }
    }
}

/// Shared handles every worker in a pool needs.
#[derive(Clone)]
pub struct DeliveryDeps {
    pub outbox: Arc<dyn Outbox>,
    pub client: WebhookClient,
    pub alerter: Alerter,
    pub metrics: Arc<BridgeMetrics>,
    pub clock: Arc<dyn Clock>,
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub claimed: usize,
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub deferred: usize,
    pub skipped: usize,
}

impl TickReport {
    /// A full, clean batch means more work is probably waiting.
    fn saturated(&self, batch_size: usize) -> bool {
        self.claimed >= batch_size && self.deferred == 0 && self.skipped == 0
    }
}

enum Settled {
    Delivered,
    Retried,
    Failed,
    Deferred,
    LeaseLost,
}

impl Settled {
    fn as_str(&self) -> &'static str {
        match self {
            Settled::Delivered => "delivered",
            Settled::Retried => "retry",
            Settled::Failed => "failed",
            Settled::Deferred => "deferred",
            Settled::LeaseLost => "lease_lost",
        }
    }
}

pub struct DeliveryWorker {
    id: usize,
    owner: String,
    deps: DeliveryDeps,
    retry: RetryPolicy,
    settings: WorkerSettings,
    heartbeat: Arc<AtomicI64>,
}

impl DeliveryWorker {
    pub fn new(id: usize, deps: DeliveryDeps, retry: RetryPolicy, settings: WorkerSettings) -> Self {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let owner = format!("{}-w{id}", &tag[..8]);
        let heartbeat = Arc::new(AtomicI64::new(deps.clock.now().timestamp_millis()));
        Self { id, owner, deps, retry, settings, heartbeat }
    }

    pub fn heartbeat(&self) -> Arc<AtomicI64> {
        Arc::clone(&self.heartbeat)
    }

    fn beat(&self) {
        self.heartbeat.store(self.deps.clock.now().timestamp_millis(), Ordering::Release);
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(worker_id = self.id, owner = %self.owner, "delivery worker starting");
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let pause = match self.run_once(&cancel).await {
                Ok(report) if report.saturated(self.settings.batch_size) => Duration::ZERO,
                Ok(_) => self.settings.poll_interval,
                Err(e) => {
                    error!(worker_id = self.id, error = %e, "delivery tick failed");
                    self.settings.poll_interval
                }
            };
            if pause.is_zero() {
                continue;
            }
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = cancel.cancelled() => break,
            }
        }
        info!(worker_id = self.id, "delivery worker stopped");
    }

    /// One poll: lease due events and settle each of them.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<TickReport> {
        self.beat();
        let claimed_at = self.deps.clock.now();
        let lease = to_chrono(self.settings.lease);
        let events = self
            .deps
            .outbox
            .claim_due(&self.owner, claimed_at, lease, self.settings.batch_size)
            .await?;

        let mut report = TickReport { claimed: events.len(), ..TickReport::default() };
        if events.is_empty() {
            return Ok(report);
        }
        debug!(worker_id = self.id, claimed = events.len(), "claimed outbox batch");

        // Stop calling out once a call could outlive the lease.
        let budget_end = claimed_at + lease - to_chrono(self.settings.request_timeout);
        let mut down: HashSet<String> = HashSet::new();

        for event in events {
            if cancel.is_cancelled() || down.contains(&event.webhook_url) || self.deps.clock.now() > budget_end {
                self.deps.outbox.release(event.event_id, &self.owner).await?;
                report.skipped += 1;
                continue;
            }

            let settled = self.deliver(&event).await?;
            match settled {
                Settled::Delivered => report.delivered += 1,
                Settled::Retried => report.retried += 1,
                Settled::Failed => report.failed += 1,
                Settled::Deferred => {
                    report.deferred += 1;
                    down.insert(event.webhook_url.clone());
                }
                Settled::LeaseLost => {}
            }
            self.beat();
        }

        info!(
            worker_id = self.id,
            claimed = report.claimed,
            delivered = report.delivered,
            retried = report.retried,
            failed = report.failed,
            deferred = report.deferred,
            skipped = report.skipped,
            "outbox tick"
        );
        Ok(report)
    }

    async fn deliver(&self, event: &Event) -> Result<Settled> {
        let attempt = event.attempts.saturating_add(1);
        let body = json!({
            "event_id": event.event_id,
            "event_type": event.event_type,
            "source": event.source,
            "payload": event.payload,
            "created_at": event.created_at,
            "attempt": attempt,
        });
        let headers = [
            (EVENT_ID_HEADER, event.event_id.to_string()),
            (ATTEMPT_HEADER, attempt.to_string()),
        ];

        let started = Instant::now();
        let result = self
            .deps
            .client
            .post_json(&event.webhook_url, &body, &headers, self.settings.request_timeout)
            .await;
        let now = self.deps.clock.now();

        let settled = match result {
            Ok(_) => {
                if self.deps.outbox.mark_delivered(event.event_id, &self.owner, now).await? {
                    info!(event_id = %event.event_id, event_type = %event.event_type, attempt, "event delivered");
                    Settled::Delivered
                } else {
                    warn!(event_id = %event.event_id, "lease lost before delivery was recorded");
                    Settled::LeaseLost
                }
            }
            Err(e) if e.is_outage() => self.defer(event, &e, now).await?,
            Err(e) => self.fail(event, attempt, &e, now).await?,
        };

        let outcome = settled.as_str();
        self.deps.metrics.deliveries.inc(&[("outcome", outcome)]);
        self.deps.metrics.delivery_duration.observe(&[("outcome", outcome)], started.elapsed());
        Ok(settled)
    }

    async fn defer(&self, event: &Event, err: &WebhookError, now: DateTime<Utc>) -> Result<Settled> {
        let next = now + to_chrono(self.retry.outage_delay());
        if self.deps.outbox.defer(event.event_id, &self.owner, &err.to_string(), next).await? {
            warn!(
                event_id = %event.event_id,
                url = %event.webhook_url,
                error = %err,
                "consumer unreachable; event stays pending"
            );
            Ok(Settled::Deferred)
        } else {
            Ok(Settled::LeaseLost)
        }
    }

    async fn fail(&self, event: &Event, attempt: u32, err: &WebhookError, now: DateTime<Utc>) -> Result<Settled> {
        let next = now + to_chrono(self.retry.next_delay(attempt));
        let outcome = self
            .deps
            .outbox
            .record_failure(event.event_id, &self.owner, &err.to_string(), next, self.retry.max_attempts)
            .await?;
        let Some(outcome) = outcome else {
            warn!(event_id = %event.event_id, "lease lost before failure was recorded");
            return Ok(Settled::LeaseLost);
        };

        if outcome.status == EventStatus::Failed {
            error!(
                event_id = %event.event_id,
                event_type = %event.event_type,
                attempts = outcome.attempts,
                error = %err,
                "event delivery failed permanently"
            );
            let alert = Alert::critical(
                format!("Event delivery failed: {}", event.event_type),
                format!(
                    "event {} from {} failed after {} attempts; last error: {err}",
                    event.event_id, event.source, outcome.attempts
                ),
                vec!["outbox".into(), event.event_type.clone()],
                now,
            );
            self.deps.alerter.raise(alert).await;
            return Ok(Settled::Failed);
        }

        warn!(
            event_id = %event.event_id,
            attempts = outcome.attempts,
            next_attempt_at = %next,
            error = %err,
            "event delivery failed; will retry"
        );
        Ok(Settled::Retried)
    }
}

/// Read side of the workers' heartbeats.
#[derive(Clone, Default)]
pub struct WorkerHealth {
    beats: Arc<Vec<Arc<AtomicI64>>>,
}

impl WorkerHealth {
    pub fn worker_count(&self) -> usize {
        self.beats.len()
    }

    /// Most recent beat across the pool.
    pub fn last_beat(&self) -> Option<DateTime<Utc>> {
        self.beats
            .iter()
            .map(|b| b.load(Ordering::Acquire))
            .max()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Workers whose last beat is within `3 * poll_interval` of `now`.
    pub fn live_workers(&self, now: DateTime<Utc>, poll_interval: Duration) -> usize {
        let window = to_chrono(poll_interval * 3).num_milliseconds();
        let now_ms = now.timestamp_millis();
        self.beats.iter().filter(|b| now_ms - b.load(Ordering::Acquire) <= window).count()
    }
}

pub struct DeliveryPool {
    handles: Vec<JoinHandle<()>>,
    health: WorkerHealth,
}

impl DeliveryPool {
    pub fn spawn(workers: usize, deps: DeliveryDeps, cfg: &DeliverySection, cancel: CancellationToken) -> Self {
        let retry = RetryPolicy::from_config(cfg);
        let settings = WorkerSettings::from_config(cfg);
        let mut handles = Vec::with_capacity(workers);
        let mut beats = Vec::with_capacity(workers);
        for id in 0..workers {
            let worker = DeliveryWorker::new(id, deps.clone(), retry.clone(), settings.clone());
            beats.push(worker.heartbeat());
            handles.push(tokio::spawn(worker.run(cancel.clone())));
        }
        info!(workers, "delivery workers spawned");
        Self { handles, health: WorkerHealth { beats: Arc::new(beats) } }
    }

    pub fn health(&self) -> WorkerHealth {
        self.health.clone()
    }

    /// Wait for workers after the shared token was cancelled.
    pub async fn join(self, timeout: Duration) {
        let all = futures_util::future::join_all(self.handles);
        match tokio::time::timeout(timeout, all).await {
            Ok(results) => {
                for r in results {
                    if let Err(e) = r {
                        error!(error = %e, "delivery worker panicked");
                    }
                }
                info!("delivery workers stopped");
            }
            Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "delivery workers did not stop in time"),
        }
    }
}
