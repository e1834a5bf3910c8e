//! Rolling-window counters in the shared store.
//!
//! Check-and-record runs in one `BEGIN IMMEDIATE` transaction, so the quota
//! holds across every process sharing the database file.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, TransactionBehavior};

use hermes_core::error::Result;
use hermes_core::model::RateScope;

use crate::policy::ratelimit::{AdmissionCounter, RateOutcome, WindowLimits};

use super::SqliteStore;

#[derive(Clone)]
pub struct StoreCounter {
    store: SqliteStore,
}

impl StoreCounter {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AdmissionCounter for StoreCounter {
    async fn try_admit(&self, caller_id: &str, limits: WindowLimits, now: DateTime<Utc>) -> Result<RateOutcome> {
        let caller_id = caller_id.to_string();
        let now_ms = now.timestamp_millis();
        self.store
            .call(move |c| {
                let tx = c.transaction_with_behavior(TransactionBehavior::Immediate)?;

                // Windows never slide backward: use the latest recorded instant if it is ahead.
                let latest: Option<i64> =
                    tx.query_row("SELECT MAX(admitted_at) FROM rate_admissions", [], |r| r.get(0))?;
                let now_ms = latest.map_or(now_ms, |l| l.max(now_ms));
                let cutoff = now_ms - limits.window_ms;

                tx.execute("DELETE FROM rate_admissions WHERE admitted_at <= ?1", params![cutoff])?;

                let global: i64 = tx.query_row("SELECT COUNT(*) FROM rate_admissions", [], |r| r.get(0))?;
                if global >= i64::from(limits.global) {
                    return Ok(RateOutcome::Exceeded(RateScope::Global));
                }

                let mine: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM rate_admissions WHERE caller_id = ?1",
                    params![caller_id],
                    |r| r.get(0),
                )?;
                if mine >= i64::from(limits.caller) {
                    return Ok(RateOutcome::Exceeded(RateScope::Caller));
                }

                tx.execute(
                    "INSERT INTO rate_admissions (caller_id, admitted_at) VALUES (?1, ?2)",
                    params![caller_id, now_ms],
                )?;
                tx.commit()?;
                Ok(RateOutcome::Admitted)
            })
            .await
    }

    async fn window_count(&self, caller_id: Option<&str>, window_ms: i64, now: DateTime<Utc>) -> Result<u64> {
        let caller_id = caller_id.map(str::to_string);
        let cutoff = now.timestamp_millis() - window_ms;
        self.store
            .call(move |c| {
                c.query_row(
                    "SELECT COUNT(*) FROM rate_admissions \
                     WHERE admitted_at > ?1 AND (?2 IS NULL OR caller_id = ?2)",
                    params![cutoff, caller_id],
                    |r| r.get::<_, i64>(0),
                )
            })
            .await
            .map(|n| n as u64)
    }

    fn backend(&self) -> &'static str {
        "store"
    }
}
