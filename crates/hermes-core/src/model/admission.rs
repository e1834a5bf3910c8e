//! Admission decisions produced by the policy engine.

use serde::Serialize;

use crate::error::BridgeError;

use super::message::Priority;

/// Which counter rejected the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateScope {
    Global,
    Caller,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    /// The caller is not cleared to send this priority.
    PriorityNotAllowed { priority: Priority },
    QuietHoursBlocked,
    RateLimited { scope: RateScope, limit: u32, window_secs: u64 },
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::PriorityNotAllowed { .. } => "priority_not_allowed",
            DenyReason::QuietHoursBlocked => "quiet_hours",
            DenyReason::RateLimited { scope: RateScope::Global, .. } => "global_rate",
            DenyReason::RateLimited { scope: RateScope::Caller, .. } => "caller_rate",
        }
    }
}

impl From<DenyReason> for BridgeError {
    fn from(r: DenyReason) -> Self {
        match r {
            DenyReason::PriorityNotAllowed { priority } => BridgeError::PriorityNotAllowed(priority.to_string()),
            DenyReason::QuietHoursBlocked => BridgeError::QuietHoursBlocked,
            DenyReason::RateLimited { scope: RateScope::Global, limit, window_secs } => {
                BridgeError::RateLimited(format!("global limit ({limit}/{window_secs}s) exceeded"))
            }
            DenyReason::RateLimited { scope: RateScope::Caller, limit, window_secs } => {
                BridgeError::RateLimited(format!("caller limit ({limit}/{window_secs}s) exceeded"))
            }
        }
    }
}

/// Result of one admission check, tagged with the policy generation it
/// was evaluated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Allow { generation: u64 },
    Deny { generation: u64, reason: DenyReason },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allow { .. })
    }

    pub fn generation(&self) -> u64 {
        match self {
            Admission::Allow { generation } | Admission::Deny { generation, .. } => *generation,
        }
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Admission::Allow { .. } => None,
            Admission::Deny { reason, .. } => Some(reason),
        }
    }
}
