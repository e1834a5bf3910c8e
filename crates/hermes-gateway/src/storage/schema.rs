use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS outbox_events (
    seq              INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id         TEXT NOT NULL UNIQUE,
    event_type       TEXT NOT NULL,
    source           TEXT NOT NULL,
    payload          TEXT NOT NULL,
    webhook_url      TEXT NOT NULL,
    status           TEXT NOT NULL DEFAULT 'pending'
                     CHECK (status IN ('pending', 'delivered', 'failed')),
    attempts         INTEGER NOT NULL DEFAULT 0,
    last_error       TEXT,
    created_at       INTEGER NOT NULL,
    next_attempt_at  INTEGER NOT NULL,
    delivered_at     INTEGER,
    lease_owner      TEXT,
    lease_expires_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending
    ON outbox_events (status, event_type, source, seq);

CREATE TABLE IF NOT EXISTS audit_log (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    caller_id        TEXT NOT NULL,
    endpoint         TEXT NOT NULL,
    target           TEXT NOT NULL,
    priority         TEXT NOT NULL,
    decision         TEXT NOT NULL,
    reason           TEXT,
    success          INTEGER NOT NULL,
    error            TEXT,
    latency_ms       INTEGER NOT NULL,
    cost_usd         REAL NOT NULL DEFAULT 0,
    request_summary  TEXT NOT NULL,
    generation       INTEGER NOT NULL DEFAULT 0,
    created_at       INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_caller_time ON audit_log (caller_id, created_at);
CREATE INDEX IF NOT EXISTS idx_audit_time ON audit_log (created_at);

CREATE TABLE IF NOT EXISTS rate_admissions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    caller_id   TEXT NOT NULL,
    admitted_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_rate_caller_time ON rate_admissions (caller_id, admitted_at);
CREATE INDEX IF NOT EXISTS idx_rate_time ON rate_admissions (admitted_at);

CREATE TABLE IF NOT EXISTS sessions (
    id            TEXT PRIMARY KEY,
    caller_id     TEXT NOT NULL,
    target        TEXT NOT NULL,
    session_type  TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 1,
    created_at    INTEGER NOT NULL,
    last_used     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_last_used ON sessions (last_used);
"#;

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    // In-memory databases answer "memory" here.
    let _mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |r| r.get(0))?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.execute_batch(SCHEMA)
}
