use serde::Deserialize;
use hermes_core::error::{BridgeError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    pub version: u32,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub policy: PolicySection,

    #[serde(default)]
    pub rate_limit: RateLimitSection,

    #[serde(default)]
    pub workflow: WorkflowSection,

    #[serde(default)]
    pub delivery: DeliverySection,

    #[serde(default)]
    pub audit: AuditSection,

    #[serde(default)]
    pub alerts: AlertSection,

    #[serde(default)]
    pub agents: Vec<AgentConfig>,

    #[serde(default)]
    pub coordinator: Option<CommandConfig>,
}

impl BridgeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(BridgeError::BadRequest(format!(
                "unsupported config version {} (expected 1)",
                self.version
            )));
        }

        self.gateway.validate()?;
        self.workflow.validate()?;
        self.delivery.validate()?;

        let mut seen = std::collections::HashSet::new();
        for a in &self.agents {
            if a.id.trim().is_empty() {
                return Err(BridgeError::BadRequest("agents[].id must not be empty".into()));
            }
            if !seen.insert(a.id.as_str()) {
                return Err(BridgeError::BadRequest(format!("duplicate agent id: {}", a.id)));
            }
            if let Some(cmd) = &a.command {
                cmd.validate(&format!("agents[{}].command", a.id))?;
            }
        }
        if let Some(c) = &self.coordinator {
            c.validate("coordinator.command")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewaySection {
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Bound on every outward synchronous call (agent, coordinator, workflow).
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// Capacity of each agent's inbound channel.
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    /// How long `/readyz` reports draining before the listener stops
    /// accepting connections.
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            inbox_capacity: default_inbox_capacity(),
            drain_grace_ms: default_drain_grace_ms(),
        }
    }
}

impl GatewaySection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=600_000).contains(&self.dispatch_timeout_ms) {
            return Err(BridgeError::BadRequest(
                "gateway.dispatch_timeout_ms must be between 100 and 600000".into(),
            ));
        }
        if !(1..=4096).contains(&self.inbox_capacity) {
            return Err(BridgeError::BadRequest(
                "gateway.inbox_capacity must be between 1 and 4096".into(),
            ));
        }
        if self.drain_grace_ms > 120_000 {
            return Err(BridgeError::BadRequest("gateway.drain_grace_ms must be at most 120000".into()));
        }
        Ok(())
    }
}

fn default_listen() -> String {
    "0.0.0.0:8787".into()
}
fn default_dispatch_timeout_ms() -> u64 {
    120_000
}
fn default_inbox_capacity() -> usize {
    64
}
fn default_drain_grace_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self { path: default_store_path() }
    }
}

fn default_store_path() -> String {
    "hermes.db".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySection {
    #[serde(default = "default_policy_path")]
    pub path: String,

    /// How often the policy file's mtime is polled. 0 disables hot reload.
    #[serde(default = "default_reload_interval_ms")]
    pub reload_interval_ms: u64,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self { path: default_policy_path(), reload_interval_ms: default_reload_interval_ms() }
    }
}

fn default_policy_path() -> String {
    "hermes_policy.yaml".into()
}
fn default_reload_interval_ms() -> u64 {
    5000
}

/// Where rolling-window counters live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// Shared durable store; the quota holds across processes.
    #[default]
    Store,
    /// Process-local counters.
    Memory,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitSection {
    #[serde(default)]
    pub backend: RateLimitBackend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkflowSection {
    #[serde(default = "default_workflow_base")]
    pub base_url: String,

    /// Name of the environment variable holding the HMAC signing secret.
    #[serde(default)]
    pub signing_secret_env: Option<String>,

    #[serde(default = "default_workflow_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            base_url: default_workflow_base(),
            signing_secret_env: None,
            timeout_ms: default_workflow_timeout_ms(),
        }
    }
}

impl WorkflowSection {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(BridgeError::BadRequest(
                "workflow.base_url must start with http:// or https://".into(),
            ));
        }
        if !(100..=600_000).contains(&self.timeout_ms) {
            return Err(BridgeError::BadRequest(
                "workflow.timeout_ms must be between 100 and 600000".into(),
            ));
        }
        Ok(())
    }

    pub fn signing_secret(&self) -> Option<String> {
        let var = self.signing_secret_env.as_deref()?;
        std::env::var(var).ok().filter(|s| !s.is_empty())
    }
}

fn default_workflow_base() -> String {
    "http://localhost:5678".into()
}
fn default_workflow_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliverySection {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// How long a claimed row stays reserved for one worker.
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
            lease_ms: default_lease_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl DeliverySection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.workers) {
            return Err(BridgeError::BadRequest("delivery.workers must be between 1 and 16".into()));
        }
        if !(1..=500).contains(&self.batch_size) {
            return Err(BridgeError::BadRequest(
                "delivery.batch_size must be between 1 and 500".into(),
            ));
        }
        if !(10..=600_000).contains(&self.poll_interval_ms) {
            return Err(BridgeError::BadRequest(
                "delivery.poll_interval_ms must be between 10 and 600000".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(BridgeError::BadRequest("delivery.max_attempts must be >= 1".into()));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(BridgeError::BadRequest(
                "delivery.max_delay_ms must be >= base_delay_ms".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(BridgeError::BadRequest("delivery.jitter must be within 0.0..=1.0".into()));
        }
        if self.lease_ms <= self.request_timeout_ms {
            return Err(BridgeError::BadRequest(
                "delivery.lease_ms must be greater than request_timeout_ms".into(),
            ));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    1
}
fn default_batch_size() -> usize {
    20
}
fn default_poll_interval_ms() -> u64 {
    5000
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_delay_ms() -> u64 {
    5000
}
fn default_max_delay_ms() -> u64 {
    300_000
}
fn default_jitter() -> f64 {
    0.1
}
fn default_lease_ms() -> u64 {
    60_000
}
fn default_request_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSection {
    /// Optional JSONL mirror of every audit record.
    #[serde(default)]
    pub jsonl_path: Option<String>,

    #[serde(default = "default_audit_queue")]
    pub queue_capacity: usize,

    /// Longest a caller-side enqueue may wait when the queue is full.
    #[serde(default = "default_audit_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
}

impl Default for AuditSection {
    fn default() -> Self {
        Self {
            jsonl_path: None,
            queue_capacity: default_audit_queue(),
            enqueue_timeout_ms: default_audit_enqueue_timeout_ms(),
        }
    }
}

fn default_audit_queue() -> usize {
    1024
}
fn default_audit_enqueue_timeout_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertSection {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub id: String,
    /// Built-in command inbox. Without it the agent's channel must be
    /// registered by the runtime that owns it.
    #[serde(default)]
    pub command: Option<CommandConfig>,
}

/// argv template; `{agent}`, `{message}` and `{session}` are substituted.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub argv: Vec<String>,
}

impl CommandConfig {
    pub fn validate(&self, field: &str) -> Result<()> {
        match self.argv.first() {
            Some(bin) if !bin.trim().is_empty() => Ok(()),
            _ => Err(BridgeError::BadRequest(format!("{field}.argv must name a program"))),
        }
    }
}
