//! Shared error type across Hermes crates.

use thiserror::Error;

/// Client-facing error codes (stable API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCode {
    /// Invalid input / malformed request.
    BadRequest,
    /// Caller or global quota exhausted for the rolling window.
    RateLimited,
    /// Non-critical traffic during quiet hours.
    QuietHoursBlocked,
    /// Caller may not send at the requested priority.
    PriorityNotAllowed,
    /// Target could not be resolved.
    UnknownTarget,
    /// Outbound call exceeded its bound.
    Timeout,
    /// Durable store unreachable.
    StoreUnavailable,
    /// Event exhausted its delivery attempts.
    DeliveryFailed,
    /// Target answered with an error.
    Upstream,
    /// Internal server error.
    Internal,
}

impl ClientCode {
    /// String representation used in JSON responses.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientCode::BadRequest => "BAD_REQUEST",
            ClientCode::RateLimited => "RATE_LIMITED",
            ClientCode::QuietHoursBlocked => "QUIET_HOURS_BLOCKED",
            ClientCode::PriorityNotAllowed => "PRIORITY_NOT_ALLOWED",
            ClientCode::UnknownTarget => "UNKNOWN_TARGET",
            ClientCode::Timeout => "TIMEOUT",
            ClientCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ClientCode::DeliveryFailed => "DELIVERY_FAILED",
            ClientCode::Upstream => "UPSTREAM",
            ClientCode::Internal => "INTERNAL",
        }
    }

    /// Admission-time errors are answered synchronously and never retried
    /// by the bridge itself.
    pub fn is_admission(self) -> bool {
        matches!(
            self,
            ClientCode::RateLimited
                | ClientCode::QuietHoursBlocked
                | ClientCode::PriorityNotAllowed
                | ClientCode::UnknownTarget
        )
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Unified error type used by core and gateway.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("quiet hours active, only priority 'critical' is admitted")]
    QuietHoursBlocked,
    #[error("priority not allowed for caller: {0}")]
    PriorityNotAllowed(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("timed out after {0}ms")]
    Timeout(u64),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("delivery failed after {attempts} attempts: {last_error}")]
    DeliveryFailed { attempts: u32, last_error: String },
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Map internal error to a stable client-facing code.
    pub fn client_code(&self) -> ClientCode {
        match self {
            BridgeError::BadRequest(_) => ClientCode::BadRequest,
            BridgeError::RateLimited(_) => ClientCode::RateLimited,
            BridgeError::QuietHoursBlocked => ClientCode::QuietHoursBlocked,
            BridgeError::PriorityNotAllowed(_) => ClientCode::PriorityNotAllowed,
            BridgeError::UnknownTarget(_) => ClientCode::UnknownTarget,
            BridgeError::Timeout(_) => ClientCode::Timeout,
            BridgeError::StoreUnavailable(_) => ClientCode::StoreUnavailable,
            BridgeError::DeliveryFailed { .. } => ClientCode::DeliveryFailed,
            BridgeError::Upstream(_) => ClientCode::Upstream,
            BridgeError::Internal(_) => ClientCode::Internal,
        }
    }

    pub fn store(e: impl std::fmt::Display) -> Self {
        BridgeError::StoreUnavailable(e.to_string())
    }
}
