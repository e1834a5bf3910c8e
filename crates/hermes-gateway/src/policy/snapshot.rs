//! Policy document (file format) and its compiled, immutable snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hermes_core::error::{BridgeError, Result};
use hermes_core::model::{Caller, Priority};

use super::quiet_hours::{QuietHours, QuietHoursConfig};

pub const DEFAULT_EVENT_WEBHOOK: &str = "/webhook/hermes-events";
const DEFAULT_ROUTE_KEY: &str = "_default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDocument {
    /// Length of the rolling rate-limit window.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    #[serde(default)]
    pub global: GlobalLimit,

    /// Quota for callers with neither an override nor a tier.
    #[serde(default = "default_caller_quota")]
    pub default_calls_per_window: u32,

    #[serde(default)]
    pub tiers: BTreeMap<String, u32>,

    #[serde(default)]
    pub callers: BTreeMap<String, CallerPolicy>,

    #[serde(default)]
    pub quiet_hours: Option<QuietHoursConfig>,

    /// event type -> workflow path or absolute URL. `_default` catches the rest.
    #[serde(default)]
    pub event_webhooks: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalLimit {
    #[serde(default = "default_global_quota")]
    pub calls_per_window: u32,
}

impl Default for GlobalLimit {
    fn default() -> Self {
        Self { calls_per_window: default_global_quota() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallerPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calls_per_window: Option<u32>,
    #[serde(default)]
    pub quiet_hours_exempt: bool,
    /// Priorities this caller may send. Absent means `normal` only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_levels: Option<Vec<Priority>>,
    /// Reported in the policy view; not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_per_call_usd: Option<f64>,
}

fn default_window_secs() -> u64 {
    3600
}
fn default_global_quota() -> u32 {
    60
}
fn default_caller_quota() -> u32 {
    5
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            global: GlobalLimit::default(),
            default_calls_per_window: default_caller_quota(),
            tiers: BTreeMap::new(),
            callers: BTreeMap::new(),
            quiet_hours: None,
            event_webhooks: BTreeMap::new(),
        }
    }
}

impl PolicyDocument {
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim().is_empty() {
            return Ok(Self::default());
        }
        let doc: PolicyDocument = serde_yaml::from_str(s)
            .map_err(|e| BridgeError::BadRequest(format!("invalid policy: {e}")))?;
        Ok(doc)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=7 * 24 * 3600).contains(&self.window_secs) {
            return Err(BridgeError::BadRequest(
                "policy.window_secs must be between 1 and 604800".into(),
            ));
        }
        for (id, c) in &self.callers {
            if let Some(tier) = &c.tier {
                if !self.tiers.contains_key(tier) {
                    return Err(BridgeError::BadRequest(format!(
                        "policy.callers.{id}.tier refers to unknown tier {tier}"
                    )));
                }
            }
            if c.priority_levels.as_ref().is_some_and(Vec::is_empty) {
                return Err(BridgeError::BadRequest(format!(
                    "policy.callers.{id}.priority_levels must not be empty"
                )));
            }
            if let Some(cost) = c.max_cost_per_call_usd {
                if !(cost.is_finite() && cost >= 0.0) {
                    return Err(BridgeError::BadRequest(format!(
                        "policy.callers.{id}.max_cost_per_call_usd must be >= 0"
                    )));
                }
            }
        }
        for (ty, route) in &self.event_webhooks {
            if route.trim().is_empty() {
                return Err(BridgeError::BadRequest(format!(
                    "policy.event_webhooks.{ty} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// One complete, validated policy view. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    pub generation: u64,
    pub loaded_at: DateTime<Utc>,
    pub document: PolicyDocument,
    quiet: Option<QuietHours>,
}

impl PolicySnapshot {
    pub fn compile(document: PolicyDocument, generation: u64, loaded_at: DateTime<Utc>) -> Result<Self> {
        document.validate()?;
        let quiet = document.quiet_hours.as_ref().map(QuietHours::compile).transpose()?;
        Ok(Self { generation, loaded_at, document, quiet })
    }

    pub fn window_ms(&self) -> i64 {
        (self.document.window_secs as i64).saturating_mul(1000)
    }

    pub fn global_quota(&self) -> u32 {
        self.document.global.calls_per_window
    }

    /// Caller identity with tier and override resolved from this snapshot.
    pub fn caller(&self, id: &str) -> Caller {
        let policy = self.document.callers.get(id);
        Caller {
            id: id.to_string(),
            tier: policy.and_then(|p| p.tier.clone()),
            quota_override: policy.and_then(|p| p.calls_per_window),
        }
    }

    /// override -> tier -> default
    pub fn quota_for(&self, caller: &Caller) -> u32 {
        if let Some(q) = caller.quota_override {
            return q;
        }
        caller
            .tier
            .as_deref()
            .and_then(|t| self.document.tiers.get(t).copied())
            .unwrap_or(self.document.default_calls_per_window)
    }

    pub fn priority_allowed(&self, caller_id: &str, priority: Priority) -> bool {
        match self.document.callers.get(caller_id).and_then(|c| c.priority_levels.as_ref()) {
            Some(levels) => levels.contains(&priority),
            None => priority == Priority::Normal,
        }
    }

    pub fn quiet_hours_active(&self, now: DateTime<Utc>) -> bool {
        self.quiet.as_ref().is_some_and(|q| q.contains(now))
    }

    pub fn is_quiet_exempt(&self, caller_id: &str) -> bool {
        let listed = self.quiet.as_ref().is_some_and(|q| q.is_exempt(caller_id));
        let flagged = self.document.callers.get(caller_id).is_some_and(|c| c.quiet_hours_exempt);
        listed || flagged
    }

    /// Webhook URL for an event type: exact route, then `_default`, then the
    /// built-in path. Relative routes are joined to `base_url`.
    pub fn webhook_for(&self, event_type: &str, base_url: &str) -> String {
        let route = self
            .document
            .event_webhooks
            .get(event_type)
            .or_else(|| self.document.event_webhooks.get(DEFAULT_ROUTE_KEY))
            .map(String::as_str)
            .unwrap_or(DEFAULT_EVENT_WEBHOOK);
        join_url(base_url, route)
    }
}

pub(crate) fn join_url(base_url: &str, route: &str) -> String {
    if route.starts_with("http://") || route.starts_with("https://") {
        return route.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if route.starts_with('/') {
        format!("{base}{route}")
    } else {
        format!("{base}/{route}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: &str = r#"
window_secs: 3600
global: { calls_per_window: 60 }
default_calls_per_window: 5
tiers: { core: 20 }
callers:
  coordinator: { tier: core, quiet_hours_exempt: true, priority_levels: [low, normal, critical] }
  researcher: { calls_per_window: 8 }
  scout: {}
quiet_hours: { start: "23:00", end: "08:00", timezone: "UTC", exempt: [ops] }
event_webhooks:
  task.created: /webhook/tasks
  _default: /webhook/hermes-events
"#;

    fn snapshot() -> PolicySnapshot {
        let doc = PolicyDocument::parse(POLICY).unwrap();
        PolicySnapshot::compile(doc, 1, Utc::now()).unwrap()
    }

    #[test]
    fn quota_resolution_order() {
        let s = snapshot();
        assert_eq!(s.quota_for(&s.caller("researcher")), 8);
        assert_eq!(s.quota_for(&s.caller("coordinator")), 20);
        assert_eq!(s.quota_for(&s.caller("scout")), 5);
        assert_eq!(s.quota_for(&s.caller("stranger")), 5);
    }

    #[test]
    fn exemption_from_list_or_flag() {
        let s = snapshot();
        assert!(s.is_quiet_exempt("ops"));
        assert!(s.is_quiet_exempt("coordinator"));
        assert!(!s.is_quiet_exempt("researcher"));
    }

    #[test]
    fn critical_is_opt_in_per_caller() {
        let s = snapshot();
        assert!(s.priority_allowed("coordinator", Priority::Critical));
        assert!(!s.priority_allowed("researcher", Priority::Critical));
        assert!(!s.priority_allowed("stranger", Priority::Critical));
        assert!(s.priority_allowed("stranger", Priority::Normal));

        let doc = PolicyDocument::parse("callers: { a: { priority_levels: [] } }").unwrap();
        assert!(PolicySnapshot::compile(doc, 1, Utc::now()).is_err());
        assert!(PolicyDocument::parse("callers: { a: { priority_levels: [urgent] } }").is_err());
    }

    #[test]
    fn webhook_routes_fall_back_to_default() {
        let s = snapshot();
        assert_eq!(s.webhook_for("task.created", "http://n8n:5678/"), "http://n8n:5678/webhook/tasks");
        assert_eq!(s.webhook_for("other", "http://n8n:5678"), "http://n8n:5678/webhook/hermes-events");

        let bare = PolicySnapshot::compile(PolicyDocument::default(), 1, Utc::now()).unwrap();
        assert_eq!(bare.webhook_for("x", "http://h"), "http://h/webhook/hermes-events");
    }

    #[test]
    fn unknown_keys_and_tiers_rejected() {
        assert!(PolicyDocument::parse("windw_secs: 10").is_err());
        let doc = PolicyDocument::parse("callers: { a: { tier: gold } }").unwrap();
        assert!(PolicySnapshot::compile(doc, 1, Utc::now()).is_err());
    }

    #[test]
    fn json_policy_is_accepted() {
        let doc = PolicyDocument::parse(r#"{"global": {"calls_per_window": 10}, "default_calls_per_window": 2}"#).unwrap();
        assert_eq!(doc.global.calls_per_window, 10);
        assert_eq!(doc.window_secs, 3600);
    }
}
