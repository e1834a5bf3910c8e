//! Policy layer (quiet hours, quotas, rolling-window rate limiting).
//!
//! The policy file is compiled into an immutable snapshot that the engine
//! reads once per admission. Reloads swap the snapshot atomically.

pub mod engine;
pub mod quiet_hours;
pub mod ratelimit;
pub mod snapshot;
pub mod store;

pub use engine::PolicyEngine;
pub use ratelimit::{AdmissionCounter, MemoryCounter, RateOutcome, WindowLimits};
pub use snapshot::{CallerPolicy, PolicyDocument, PolicySnapshot};
pub use store::PolicyStore;
