//! Shared application state for the Hermes bridge.
//!
//! `AppState::build` wires every component from a validated `BridgeConfig`
//! and returns the background tasks separately so `main` can stop them in
//! order during shutdown. Startup errors are returned, never panicked.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hermes_core::clock::{Clock, SystemClock};
use hermes_core::error::Result;

use crate::audit::AuditLogger;
use crate::config::{BridgeConfig, CommandConfig, RateLimitBackend};
use crate::delivery::{Alerter, DeliveryDeps, DeliveryPool, WorkerHealth};
use crate::dispatch::{AgentRegistry, CommandInbox, Dispatcher, Inbox, WorkflowDispatch};
use crate::obs::BridgeMetrics;
use crate::policy::{AdmissionCounter, MemoryCounter, PolicyEngine, PolicyStore};
use crate::storage::{Outbox, SqliteStore, StoreCounter};
use crate::webhook::WebhookClient;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: BridgeConfig,
    store: SqliteStore,
    outbox: Arc<dyn Outbox>,
    engine: Arc<PolicyEngine>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<BridgeMetrics>,
    clock: Arc<dyn Clock>,
    workers: WorkerHealth,
}

/// Tasks owned by the running bridge, stopped by `shutdown`.
pub struct Background {
    cancel: CancellationToken,
    pool: DeliveryPool,
    audit: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
    inboxes: Vec<JoinHandle<()>>,
}

impl Background {
    /// Cancel everything, then wait for workers and the audit flush.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.pool.join(SHUTDOWN_GRACE).await;
        if let Some(w) = self.watcher {
            let _ = w.await;
        }
        for h in self.inboxes {
            let _ = h.await;
        }
        match tokio::time::timeout(SHUTDOWN_GRACE, self.audit).await {
            Ok(_) => tracing::info!("audit queue flushed"),
            Err(_) => tracing::warn!("audit writer did not finish in time"),
        }
    }
}

impl AppState {
    /// Build state on the system clock. Must run inside the tokio runtime.
    pub fn build(cfg: BridgeConfig) -> Result<(Self, Background)> {
        Self::build_with_clock(cfg, Arc::new(SystemClock))
    }

    pub fn build_with_clock(cfg: BridgeConfig, clock: Arc<dyn Clock>) -> Result<(Self, Background)> {
        cfg.validate()?;
        let cancel = CancellationToken::new();
        let metrics = Arc::new(BridgeMetrics::default());

        // 1) Durable store and admission counters
        let store = SqliteStore::open(&cfg.store.path)?;
        let counter: Arc<dyn AdmissionCounter> = match cfg.rate_limit.backend {
            RateLimitBackend::Store => Arc::new(StoreCounter::new(store.clone())),
            RateLimitBackend::Memory => Arc::new(MemoryCounter::new()),
        };

        // 2) Policy snapshot + hot reload
        let policy = Arc::new(PolicyStore::load(&cfg.policy.path)?);
        let watcher = (cfg.policy.reload_interval_ms > 0).then(|| {
            Arc::clone(&policy).spawn_watcher(Duration::from_millis(cfg.policy.reload_interval_ms), cancel.clone())
        });
        let engine = Arc::new(PolicyEngine::new(policy, counter));

        // 3) Live channels: built-in command inboxes
        let registry = Arc::new(AgentRegistry::new());
        let mut inboxes = Vec::new();
        for agent in &cfg.agents {
            if let Some(cmd) = &agent.command {
                let inbox = spawn_command(&agent.id, cmd, cfg.gateway.inbox_capacity, &cancel, &mut inboxes);
                registry.register(agent.id.clone(), inbox);
            }
        }
        if let Some(cmd) = &cfg.coordinator {
            let inbox = spawn_command("claude", cmd, cfg.gateway.inbox_capacity, &cancel, &mut inboxes);
            registry.register_coordinator(inbox);
        }

        // 4) Outbound HTTP, audit, dispatcher
        let client = WebhookClient::new(cfg.workflow.signing_secret())?;
        let workflow = WorkflowDispatch::new(
            client.clone(),
            cfg.workflow.base_url.clone(),
            Duration::from_millis(cfg.workflow.timeout_ms),
        );
        let (audit, audit_handle) = AuditLogger::spawn(
            store.clone(),
            cfg.audit.jsonl_path.as_ref().map(PathBuf::from),
            cfg.audit.queue_capacity,
            Duration::from_millis(cfg.audit.enqueue_timeout_ms),
            Arc::clone(&metrics),
            cancel.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&engine),
            registry,
            workflow,
            audit,
            store.clone(),
            Arc::clone(&metrics),
            Arc::clone(&clock),
            Duration::from_millis(cfg.gateway.dispatch_timeout_ms),
        ));

        // 5) Outbox delivery workers
        let outbox: Arc<dyn Outbox> = Arc::new(store.clone());
        let deps = DeliveryDeps {
            outbox: Arc::clone(&outbox),
            client: client.clone(),
            alerter: Alerter::new(client, cfg.alerts.webhook_url.clone(), Arc::clone(&metrics)),
            metrics: Arc::clone(&metrics),
            clock: Arc::clone(&clock),
        };
        let pool = DeliveryPool::spawn(cfg.delivery.workers, deps, &cfg.delivery, cancel.clone());
        let workers = pool.health();

        tracing::info!(
            store = %cfg.store.path,
            policy = %cfg.policy.path,
            rate_limit = engine.counter().backend(),
            agents = cfg.agents.len(),
            coordinator = cfg.coordinator.is_some(),
            workers = cfg.delivery.workers,
            signing = cfg.workflow.signing_secret_env.is_some(),
            "bridge state ready"
        );

        let state = Self {
            inner: Arc::new(AppStateInner { cfg, store, outbox, engine, dispatcher, metrics, clock, workers }),
        };
        let background = Background { cancel, pool, audit: audit_handle, watcher, inboxes };
        Ok((state, background))
    }

    pub fn cfg(&self) -> &BridgeConfig {
        &self.inner.cfg
    }

    pub fn store(&self) -> &SqliteStore {
        &self.inner.store
    }

    pub fn outbox(&self) -> &Arc<dyn Outbox> {
        &self.inner.outbox
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.inner.engine
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.inner.dispatcher)
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        self.inner.dispatcher.registry()
    }

    pub fn metrics(&self) -> &Arc<BridgeMetrics> {
        &self.inner.metrics
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn workers(&self) -> &WorkerHealth {
        &self.inner.workers
    }

    pub fn set_draining(&self) {
        self.inner.metrics.set_draining();
    }

    pub fn is_draining(&self) -> bool {
        self.inner.metrics.is_draining()
    }

    /// Report draining right away, then hold for `grace` so load balancers
    /// see `/readyz` fail before the listener closes.
    pub async fn drain(&self, grace: Duration) {
        self.set_draining();
        tracing::info!(grace_ms = grace.as_millis() as u64, "draining; listener closes after grace period");
        tokio::time::sleep(grace).await;
    }

    /// Outbox gauges appended to the metrics page.
    pub async fn metrics_extra(&self) -> Vec<(&'static str, u64)> {
        match self.inner.outbox.counts().await {
            Ok(c) => vec![
                ("hermes_outbox_pending", c.pending),
                ("hermes_outbox_delivered", c.delivered),
                ("hermes_outbox_failed", c.failed),
            ],
            Err(e) => {
                tracing::warn!(error = %e, "outbox counts unavailable for metrics");
                Vec::new()
            }
        }
    }
}

fn spawn_command(
    name: &str,
    cmd: &CommandConfig,
    capacity: usize,
    cancel: &CancellationToken,
    handles: &mut Vec<JoinHandle<()>>,
) -> Inbox {
    let (inbox, rx) = Inbox::channel(capacity);
    handles.push(CommandInbox::new(name, cmd.argv.clone()).spawn(rx, cancel.clone()));
    inbox
}
