//! Outbox events and their delivery state machine.
//!
//! `pending` is the only non-terminal state. `delivered` and `failed` are
//! terminal and are reached at most once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Unique event identifier, also the consumer-side idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EventId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(EventId)
            .map_err(|e| BridgeError::BadRequest(format!("invalid event id {s}: {e}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Pending,
    Delivered,
    Failed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Delivered => "delivered",
            EventStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, EventStatus::Pending)
    }

    /// Allowed moves: pending -> delivered, pending -> failed.
    pub fn can_transition_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Pending, EventStatus::Delivered) | (EventStatus::Pending, EventStatus::Failed)
        )
    }
}

impl FromStr for EventStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "delivered" => Ok(EventStatus::Delivered),
            "failed" => Ok(EventStatus::Failed),
            other => Err(BridgeError::Internal(format!("unknown event status: {other}"))),
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event as submitted, before it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub payload: Value,
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, payload: Value) -> Self {
        Self { event_type: event_type.into(), source: source.into(), payload }
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_type.trim().is_empty() {
            return Err(BridgeError::BadRequest("event_type must not be empty".into()));
        }
        if self.source.trim().is_empty() {
            return Err(BridgeError::BadRequest("source must not be empty".into()));
        }
        Ok(())
    }
}

/// Persisted outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub event_type: String,
    pub source: String,
    pub payload: Value,
    pub webhook_url: String,
    pub status: EventStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub next_attempt_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Delivery order is only guaranteed inside one partition.
    pub fn partition(&self) -> (&str, &str) {
        (&self.event_type, &self.source)
    }
}

/// Filter for pending-event listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EventFilter {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).clamp(1, Self::MAX_LIMIT)
    }
}

/// Outbox row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxCounts {
    pub pending: u64,
    pub delivered: u64,
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_moves() {
        assert!(EventStatus::Pending.can_transition_to(EventStatus::Delivered));
        assert!(EventStatus::Pending.can_transition_to(EventStatus::Failed));
        assert!(!EventStatus::Delivered.can_transition_to(EventStatus::Failed));
        assert!(!EventStatus::Failed.can_transition_to(EventStatus::Delivered));
        assert!(!EventStatus::Delivered.can_transition_to(EventStatus::Pending));
        assert!(!EventStatus::Pending.can_transition_to(EventStatus::Pending));
    }

    #[test]
    fn filter_limit_is_clamped() {
        assert_eq!(EventFilter::default().effective_limit(), 50);
        let f = EventFilter { limit: Some(10_000), ..Default::default() };
        assert_eq!(f.effective_limit(), 500);
        let f = EventFilter { limit: Some(0), ..Default::default() };
        assert_eq!(f.effective_limit(), 1);
    }

    #[test]
    fn blank_event_type_rejected() {
        let e = NewEvent::new("  ", "scheduler", Value::Null);
        assert!(e.validate().is_err());
    }
}
