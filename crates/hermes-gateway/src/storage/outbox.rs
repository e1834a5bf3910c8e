//! Event outbox: durable pending events and their delivery transitions.
//!
//! Every transition is a compare-and-swap on the stored row. A worker must
//! hold the row's lease to complete it, and only `pending` rows can be
//! leased, so a delivered or failed event is never handed out again.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use hermes_core::error::{BridgeError, Result};
use hermes_core::model::{Event, EventFilter, EventId, EventStatus, NewEvent, OutboxCounts};

use super::SqliteStore;

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    pub attempts: u32,
    pub status: EventStatus,
}

#[async_trait]
pub trait Outbox: Send + Sync + 'static {
    /// Durably store a new pending event. The row exists once this returns.
    async fn enqueue(&self, event: NewEvent, webhook_url: String, now: DateTime<Utc>) -> Result<EventId>;

    async fn get(&self, id: EventId) -> Result<Option<Event>>;

    async fn list_pending(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    async fn delete_delivered(&self) -> Result<u64>;

    async fn counts(&self) -> Result<OutboxCounts>;

    /// Lease up to `limit` due partition heads for `owner`.
    async fn claim_due(&self, owner: &str, now: DateTime<Utc>, lease: Duration, limit: usize) -> Result<Vec<Event>>;

    /// pending -> delivered. `false` if the row was not pending under `owner`'s lease.
    async fn mark_delivered(&self, id: EventId, owner: &str, now: DateTime<Utc>) -> Result<bool>;

    /// Count one failed attempt; the row turns `failed` once attempts reach `max_attempts`.
    async fn record_failure(
        &self,
        id: EventId,
        owner: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Option<FailureOutcome>>;

    /// Consumer outage: reschedule without counting an attempt.
    async fn defer(&self, id: EventId, owner: &str, error: &str, next_attempt_at: DateTime<Utc>) -> Result<bool>;

    /// Give the lease back untouched.
    async fn release(&self, id: EventId, owner: &str) -> Result<bool>;
}

const EVENT_COLUMNS: &str = "event_id, event_type, source, payload, webhook_url, status, \
     attempts, last_error, created_at, next_attempt_at, delivered_at";

fn conv_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

pub(crate) fn ms_to_ts(ms: i64, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    let id: String = row.get(0)?;
    let payload: String = row.get(3)?;
    let status: String = row.get(5)?;
    Ok(Event {
        event_id: EventId(Uuid::parse_str(&id).map_err(|e| conv_err(0, e))?),
        event_type: row.get(1)?,
        source: row.get(2)?,
        payload: serde_json::from_str(&payload).map_err(|e| conv_err(3, e))?,
        webhook_url: row.get(4)?,
        status: status.parse::<EventStatus>().map_err(|e| conv_err(5, e))?,
        attempts: row.get(6)?,
        last_error: row.get(7)?,
        created_at: ms_to_ts(row.get(8)?, 8)?,
        next_attempt_at: ms_to_ts(row.get(9)?, 9)?,
        delivered_at: row.get::<_, Option<i64>>(10)?.map(|ms| ms_to_ts(ms, 10)).transpose()?,
    })
}

#[async_trait]
impl Outbox for SqliteStore {
    async fn enqueue(&self, event: NewEvent, webhook_url: String, now: DateTime<Utc>) -> Result<EventId> {
        event.validate()?;
        let id = EventId::new();
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| BridgeError::BadRequest(format!("payload not serializable: {e}")))?;
        let now_ms = now.timestamp_millis();
        self.call(move |c| {
            c.execute(
                "INSERT INTO outbox_events \
                 (event_id, event_type, source, payload, webhook_url, status, attempts, created_at, next_attempt_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?6)",
                params![id.to_string(), event.event_type, event.source, payload, webhook_url, now_ms],
            )
        })
        .await?;
        Ok(id)
    }

    async fn get(&self, id: EventId) -> Result<Option<Event>> {
        self.call(move |c| {
            c.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM outbox_events WHERE event_id = ?1"),
                params![id.to_string()],
                row_to_event,
            )
            .optional()
        })
        .await
    }

    async fn list_pending(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let event_type = filter.event_type.clone();
        let source = filter.source.clone();
        let limit = filter.effective_limit() as i64;
        self.call(move |c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM outbox_events \
                 WHERE status = 'pending' \
                   AND (?1 IS NULL OR event_type = ?1) \
                   AND (?2 IS NULL OR source = ?2) \
                 ORDER BY seq LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![event_type, source, limit], row_to_event)?;
            rows.collect()
        })
        .await
    }

    async fn delete_delivered(&self) -> Result<u64> {
        self.call(|c| c.execute("DELETE FROM outbox_events WHERE status = 'delivered'", []))
            .await
            .map(|n| n as u64)
    }

    async fn counts(&self) -> Result<OutboxCounts> {
        self.call(|c| {
            let mut stmt = c.prepare("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")?;
            let mut counts = OutboxCounts::default();
            let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
            for row in rows {
                let (status, n) = row?;
                match status.as_str() {
                    "pending" => counts.pending = n as u64,
                    "delivered" => counts.delivered = n as u64,
                    "failed" => counts.failed = n as u64,
                    _ => {}
                }
            }
            Ok(counts)
        })
        .await
    }

    async fn claim_due(&self, owner: &str, now: DateTime<Utc>, lease: Duration, limit: usize) -> Result<Vec<Event>> {
        let owner = owner.to_string();
        let now_ms = now.timestamp_millis();
        let expires_ms = (now + lease).timestamp_millis();
        let limit = limit as i64;
        self.call(move |c| {
            let tx = c.transaction_with_behavior(TransactionBehavior::Immediate)?;
            // Only the oldest pending row of each (type, source) partition is eligible.
            let candidates: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT o.event_id FROM outbox_events o \
                     WHERE o.status = 'pending' \
                       AND o.next_attempt_at <= ?1 \
                       AND (o.lease_owner IS NULL OR o.lease_expires_at <= ?1) \
                       AND NOT EXISTS ( \
                           SELECT 1 FROM outbox_events p \
                           WHERE p.status = 'pending' \
                             AND p.event_type = o.event_type \
                             AND p.source = o.source \
                             AND p.seq < o.seq) \
                     ORDER BY o.seq LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![now_ms, limit], |r| r.get(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let mut claimed = Vec::with_capacity(candidates.len());
            for id in candidates {
                let n = tx.execute(
                    "UPDATE outbox_events SET lease_owner = ?1, lease_expires_at = ?2 \
                     WHERE event_id = ?3 AND status = 'pending' \
                       AND (lease_owner IS NULL OR lease_expires_at <= ?4)",
                    params![owner, expires_ms, id, now_ms],
                )?;
                if n == 1 {
                    let ev = tx.query_row(
                        &format!("SELECT {EVENT_COLUMNS} FROM outbox_events WHERE event_id = ?1"),
                        params![id],
                        row_to_event,
                    )?;
                    claimed.push(ev);
                }
            }
            tx.commit()?;
            Ok(claimed)
        })
        .await
    }

    async fn mark_delivered(&self, id: EventId, owner: &str, now: DateTime<Utc>) -> Result<bool> {
        let owner = owner.to_string();
        let now_ms = now.timestamp_millis();
        self.call(move |c| {
            c.execute(
                "UPDATE outbox_events \
                 SET status = 'delivered', delivered_at = ?1, last_error = NULL, \
                     lease_owner = NULL, lease_expires_at = NULL \
                 WHERE event_id = ?2 AND status = 'pending' AND lease_owner = ?3",
                params![now_ms, id.to_string(), owner],
            )
        })
        .await
        .map(|n| n == 1)
    }

    async fn record_failure(
        &self,
        id: EventId,
        owner: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Option<FailureOutcome>> {
        let owner = owner.to_string();
        let error = error.to_string();
        let next_ms = next_attempt_at.timestamp_millis();
        self.call(move |c| {
            let tx = c.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let prev: Option<u32> = tx
                .query_row(
                    "SELECT attempts FROM outbox_events \
                     WHERE event_id = ?1 AND status = 'pending' AND lease_owner = ?2",
                    params![id.to_string(), owner],
                    |r| r.get(0),
                )
                .optional()?;
            let Some(prev) = prev else { return Ok(None) };

            let attempts = prev.saturating_add(1);
            let status = if attempts >= max_attempts { EventStatus::Failed } else { EventStatus::Pending };
            tx.execute(
                "UPDATE outbox_events \
                 SET attempts = ?1, last_error = ?2, status = ?3, next_attempt_at = ?4, \
                     lease_owner = NULL, lease_expires_at = NULL \
                 WHERE event_id = ?5",
                params![attempts, error, status.as_str(), next_ms, id.to_string()],
            )?;
            tx.commit()?;
            Ok(Some(FailureOutcome { attempts, status }))
        })
        .await
    }

    async fn defer(&self, id: EventId, owner: &str, error: &str, next_attempt_at: DateTime<Utc>) -> Result<bool> {
        let owner = owner.to_string();
        let error = error.to_string();
        let next_ms = next_attempt_at.timestamp_millis();
        self.call(move |c| {
            c.execute(
                "UPDATE outbox_events \
                 SET last_error = ?1, next_attempt_at = ?2, lease_owner = NULL, lease_expires_at = NULL \
                 WHERE event_id = ?3 AND status = 'pending' AND lease_owner = ?4",
                params![error, next_ms, id.to_string(), owner],
            )
        })
        .await
        .map(|n| n == 1)
    }

    async fn release(&self, id: EventId, owner: &str) -> Result<bool> {
        let owner = owner.to_string();
        self.call(move |c| {
            c.execute(
                "UPDATE outbox_events SET lease_owner = NULL, lease_expires_at = NULL \
                 WHERE event_id = ?1 AND status = 'pending' AND lease_owner = ?2",
                params![id.to_string(), owner],
            )
        })
        .await
        .map(|n| n == 1)
    }
}
