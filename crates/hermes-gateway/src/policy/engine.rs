use std::sync::Arc;

use chrono::{DateTime, Utc};

use hermes_core::error::Result;
use hermes_core::model::{Admission, DenyReason, Priority, RateScope};

use super::ratelimit::{AdmissionCounter, RateOutcome, WindowLimits};
use super::snapshot::PolicySnapshot;
use super::store::PolicyStore;

/// Admission control: priority clearance, then quiet hours, then global
/// rate, then caller rate.
/// Construct once at startup, then share via Arc.
pub struct PolicyEngine {
    store: Arc<PolicyStore>,
    counter: Arc<dyn AdmissionCounter>,
}

impl PolicyEngine {
    pub fn new(store: Arc<PolicyStore>, counter: Arc<dyn AdmissionCounter>) -> Self {
        Self { store, counter }
    }

    pub fn store(&self) -> &Arc<PolicyStore> {
        &self.store
    }

    pub fn counter(&self) -> &Arc<dyn AdmissionCounter> {
        &self.counter
    }

    pub fn snapshot(&self) -> Arc<PolicySnapshot> {
        self.store.current()
    }

    /// Decide one call. The whole evaluation uses a single snapshot.
    pub async fn admit(&self, caller_id: &str, priority: Priority, now: DateTime<Utc>) -> Result<Admission> {
        let snapshot = self.store.current();
        self.admit_with(&snapshot, caller_id, priority, now).await
    }

    pub async fn admit_with(
        &self,
        snapshot: &PolicySnapshot,
        caller_id: &str,
        priority: Priority,
        now: DateTime<Utc>,
    ) -> Result<Admission> {
        let generation = snapshot.generation;

        if !snapshot.priority_allowed(caller_id, priority) {
            return Ok(Admission::Deny { generation, reason: DenyReason::PriorityNotAllowed { priority } });
        }

        if snapshot.quiet_hours_active(now) && !priority.is_critical() && !snapshot.is_quiet_exempt(caller_id) {
            return Ok(Admission::Deny { generation, reason: DenyReason::QuietHoursBlocked });
        }

        let caller = snapshot.caller(caller_id);
        let limits = WindowLimits {
            window_ms: snapshot.window_ms(),
            global: snapshot.global_quota(),
            caller: snapshot.quota_for(&caller),
        };

        match self.counter.try_admit(caller_id, limits, now).await? {
            RateOutcome::Admitted => Ok(Admission::Allow { generation }),
            RateOutcome::Exceeded(scope) => {
                let limit = match scope {
                    RateScope::Global => limits.global,
                    RateScope::Caller => limits.caller,
                };
                Ok(Admission::Deny {
                    generation,
                    reason: DenyReason::RateLimited { scope, limit, window_secs: snapshot.document.window_secs },
                })
            }
        }
    }
}
