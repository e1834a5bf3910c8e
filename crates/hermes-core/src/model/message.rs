//! Synchronous call types: callers, targets, messages and replies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};

/// Message priority. Only `critical` overrides quiet hours; the legacy
/// `low` and `high` levels are read as `normal`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    #[serde(alias = "low", alias = "high")]
    Normal,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Critical => "critical",
        }
    }

    pub fn is_critical(self) -> bool {
        matches!(self, Priority::Critical)
    }
}

impl FromStr for Priority {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" | "low" | "high" => Ok(Priority::Normal),
            "critical" => Ok(Priority::Critical),
            other => Err(BridgeError::BadRequest(format!(
                "invalid priority: {other} (expected normal|critical)"
            ))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a synchronous call is headed. Resolved once per call, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// A named agent's live inbound channel.
    Agent(String),
    /// The coordinating CLI.
    Claude,
    /// A webhook path on the workflow engine (e.g. `/webhook/daily-digest`).
    Workflow(String),
}

impl Target {
    /// Label used in audit rows and metrics.
    pub fn label(&self) -> String {
        match self {
            Target::Agent(id) => id.clone(),
            Target::Claude => "claude".to_string(),
            Target::Workflow(path) => format!("n8n:{path}"),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Target::Agent(_) => "agent",
            Target::Claude => "claude",
            Target::Workflow(_) => "workflow",
        }
    }
}

/// Caller identity as seen by admission. Read-only during a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    pub tier: Option<String>,
    /// Custom quota for the rolling window, overriding the tier default.
    pub quota_override: Option<u32>,
}

/// One synchronous message. Lives only for the duration of a call.
#[derive(Debug, Clone)]
pub struct Message {
    pub caller: String,
    pub target: Target,
    pub body: Value,
    pub priority: Priority,
    pub timestamp: DateTime<Utc>,
    /// Session tag handed to the agent runtime.
    pub session_id: String,
}

impl Message {
    /// Plain-text view of the body for text-oriented targets.
    pub fn text(&self) -> String {
        match &self.body {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Short prefix of the body kept in audit rows.
    pub fn summary(&self, max_chars: usize) -> String {
        self.text().chars().take(max_chars).collect()
    }
}

/// Builds the session id handed to agents: `hermes-{caller}-{target}-{purpose}`.
pub fn session_id(caller: &str, target: &Target, purpose: &str) -> String {
    let target = match target {
        Target::Agent(id) => id.as_str(),
        Target::Claude => "claude",
        Target::Workflow(_) => "n8n",
    };
    format!("hermes-{caller}-{target}-{purpose}")
}

/// Acknowledgment returned by a target.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Self { response: Value::String(s.into()), ..Default::default() }
    }
}
