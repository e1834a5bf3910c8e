//! Rolling-window admission counters.
//!
//! Each admission is recorded as a timestamp; a call is admitted only if,
//! within the last `window_ms`, the global log holds fewer than `global`
//! entries and the caller's log fewer than `caller` entries. Check and
//! record happen in one critical section.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use hermes_core::error::{BridgeError, Result};
use hermes_core::model::RateScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimits {
    pub window_ms: i64,
    pub global: u32,
    pub caller: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOutcome {
    Admitted,
    Exceeded(RateScope),
}

#[async_trait]
pub trait AdmissionCounter: Send + Sync {
    /// Check both quotas and, if both pass, record one admission.
    async fn try_admit(&self, caller_id: &str, limits: WindowLimits, now: DateTime<Utc>) -> Result<RateOutcome>;

    /// Admissions inside the window: global when `caller_id` is `None`.
    async fn window_count(&self, caller_id: Option<&str>, window_ms: i64, now: DateTime<Utc>) -> Result<u64>;

    fn backend(&self) -> &'static str;
}

#[derive(Default)]
struct Logs {
    global: VecDeque<i64>,
    callers: HashMap<String, VecDeque<i64>>,
    // Highest instant seen; windows never slide backward on clock skew.
    high_water: i64,
}

impl Logs {
    fn effective_now(&mut self, now: DateTime<Utc>) -> i64 {
        let ms = now.timestamp_millis();
        if ms > self.high_water {
            self.high_water = ms;
        }
        self.high_water
    }
}

fn prune(log: &mut VecDeque<i64>, cutoff: i64) {
    while log.front().is_some_and(|&t| t <= cutoff) {
        log.pop_front();
    }
}

/// Process-local counters.
#[derive(Default)]
pub struct MemoryCounter {
    logs: Mutex<Logs>,
}

impl MemoryCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AdmissionCounter for MemoryCounter {
    async fn try_admit(&self, caller_id: &str, limits: WindowLimits, now: DateTime<Utc>) -> Result<RateOutcome> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| BridgeError::Internal("rate limiter mutex poisoned".into()))?;
        let now_ms = logs.effective_now(now);
        let cutoff = now_ms - limits.window_ms;

        prune(&mut logs.global, cutoff);
        if logs.global.len() >= limits.global as usize {
            return Ok(RateOutcome::Exceeded(RateScope::Global));
        }

        let Logs { global, callers, .. } = &mut *logs;
        let used = callers.get_mut(caller_id).map_or(0, |log| {
            prune(log, cutoff);
            log.len()
        });
        if used >= limits.caller as usize {
            return Ok(RateOutcome::Exceeded(RateScope::Caller));
        }

        callers.entry(caller_id.to_string()).or_default().push_back(now_ms);
        global.push_back(now_ms);

        // Every live caller entry has a twin in the global log, so more
        // callers than global entries means some logs have gone idle.
        if callers.len() > global.len() {
            callers.retain(|_, log| {
                prune(log, cutoff);
                !log.is_empty()
            });
        }
        Ok(RateOutcome::Admitted)
    }

    async fn window_count(&self, caller_id: Option<&str>, window_ms: i64, now: DateTime<Utc>) -> Result<u64> {
        let mut logs = self
            .logs
            .lock()
            .map_err(|_| BridgeError::Internal("rate limiter mutex poisoned".into()))?;
        let cutoff = logs.effective_now(now) - window_ms;
        let log = match caller_id {
            None => Some(&logs.global),
            Some(id) => logs.callers.get(id),
        };
        Ok(log.map(|l| l.iter().filter(|&&t| t > cutoff).count() as u64).unwrap_or(0))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
