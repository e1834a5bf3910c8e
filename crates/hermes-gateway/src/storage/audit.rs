//! Audit rows and usage aggregates.

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::Serialize;

use hermes_core::error::Result;

use super::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Admitted,
    Denied,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Admitted => "admitted",
            Decision::Denied => "denied",
        }
    }
}

/// One call, admitted or denied.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub caller_id: String,
    pub endpoint: String,
    pub target: String,
    pub priority: String,
    pub decision: Decision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    pub cost_usd: f64,
    pub request_summary: String,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CallerUsage {
    pub caller_id: String,
    pub calls: u64,
    pub cost_usd: f64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageStats {
    pub last_hour: Vec<CallerUsage>,
    pub last_24h: UsageTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub cost_usd: f64,
    pub errors: u64,
    pub denied: u64,
}

impl SqliteStore {
    pub async fn insert_audit(&self, rec: &AuditRecord) -> Result<()> {
        let rec = rec.clone();
        self.call(move |c| {
            c.execute(
                "INSERT INTO audit_log \
                 (caller_id, endpoint, target, priority, decision, reason, success, error, \
                  latency_ms, cost_usd, request_summary, generation, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    rec.caller_id,
                    rec.endpoint,
                    rec.target,
                    rec.priority,
                    rec.decision.as_str(),
                    rec.reason,
                    rec.success,
                    rec.error,
                    rec.latency_ms as i64,
                    rec.cost_usd,
                    rec.request_summary,
                    rec.generation as i64,
                    rec.created_at.timestamp_millis(),
                ],
            )
            .map(|_| ())
        })
        .await
    }

    pub async fn audit_count(&self, caller_id: Option<&str>) -> Result<u64> {
        let caller_id = caller_id.map(str::to_string);
        self.call(move |c| {
            c.query_row(
                "SELECT COUNT(*) FROM audit_log WHERE (?1 IS NULL OR caller_id = ?1)",
                params![caller_id],
                |r| r.get::<_, i64>(0),
            )
        })
        .await
        .map(|n| n as u64)
    }

    pub async fn usage_stats(&self, now: DateTime<Utc>) -> Result<UsageStats> {
        let hour_ago = (now - Duration::hours(1)).timestamp_millis();
        let day_ago = (now - Duration::hours(24)).timestamp_millis();
        self.call(move |c| {
            let mut stmt = c.prepare(
                "SELECT caller_id, COUNT(*), COALESCE(SUM(cost_usd), 0), \
                        COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) \
                 FROM audit_log WHERE created_at >= ?1 \
                 GROUP BY caller_id ORDER BY caller_id",
            )?;
            let rows = stmt.query_map(params![hour_ago], |r| {
                Ok(CallerUsage {
                    caller_id: r.get(0)?,
                    calls: r.get::<_, i64>(1)? as u64,
                    cost_usd: r.get(2)?,
                    errors: r.get::<_, i64>(3)? as u64,
                })
            })?;
            let last_hour = rows.collect::<rusqlite::Result<Vec<_>>>()?;

            let last_24h = c.query_row(
                "SELECT COUNT(*), COALESCE(SUM(cost_usd), 0), \
                        COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0), \
                        COALESCE(SUM(CASE WHEN decision = 'denied' THEN 1 ELSE 0 END), 0) \
                 FROM audit_log WHERE created_at >= ?1",
                params![day_ago],
                |r| {
                    Ok(UsageTotals {
                        calls: r.get::<_, i64>(0)? as u64,
                        cost_usd: r.get(1)?,
                        errors: r.get::<_, i64>(2)? as u64,
                        denied: r.get::<_, i64>(3)? as u64,
                    })
                },
            )?;
            Ok(UsageStats { last_hour, last_24h })
        })
        .await
    }
}
