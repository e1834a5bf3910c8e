//! Conversation sessions keyed by `hermes-{caller}-{target}-{purpose}`.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::Serialize;

use hermes_core::error::Result;

use super::outbox::ms_to_ts;
use super::SqliteStore;

pub const SESSION_LIST_LIMIT: u32 = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionRow {
    pub id: String,
    pub caller_id: String,
    pub target: String,
    /// `agent`, `claude` or `workflow`.
    pub session_type: String,
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}

const SESSION_COLUMNS: &str = "id, caller_id, target, session_type, message_count, created_at, last_used";

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        caller_id: row.get(1)?,
        target: row.get(2)?,
        session_type: row.get(3)?,
        message_count: row.get::<_, i64>(4)? as u64,
        created_at: ms_to_ts(row.get(5)?, 5)?,
        last_used: ms_to_ts(row.get(6)?, 6)?,
    })
}

impl SqliteStore {
    /// Create the session on first use; afterwards bump `message_count`
    /// and `last_used`. Returns the row as stored.
    pub async fn touch_session(
        &self,
        id: &str,
        caller_id: &str,
        target: &str,
        session_type: &str,
        now: DateTime<Utc>,
    ) -> Result<SessionRow> {
        let (id, caller_id, target, session_type) =
            (id.to_string(), caller_id.to_string(), target.to_string(), session_type.to_string());
        let at = now.timestamp_millis();
        self.call(move |c| {
            c.query_row(
                &format!(
                    "INSERT INTO sessions (id, caller_id, target, session_type, message_count, created_at, last_used) \
                     VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5) \
                     ON CONFLICT(id) DO UPDATE SET \
                         message_count = message_count + 1, \
                         last_used = MAX(last_used, excluded.last_used) \
                     RETURNING {SESSION_COLUMNS}"
                ),
                params![id, caller_id, target, session_type, at],
                row_to_session,
            )
        })
        .await
    }

    /// Most recently used first.
    pub async fn list_sessions(&self, limit: u32) -> Result<Vec<SessionRow>> {
        self.call(move |c| {
            let mut stmt = c.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY last_used DESC, id LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], row_to_session)?;
            let sessions = rows.collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(sessions)
        })
        .await
    }
}
