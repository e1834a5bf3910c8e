//! Durable store (SQLite): outbox events, audit log, rate-window admissions
//! and conversation sessions.
//!
//! One mutex-guarded connection; every call runs on the blocking pool.

pub mod audit;
pub mod counters;
pub mod outbox;
mod schema;
pub mod sessions;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use hermes_core::error::{BridgeError, Result};

pub use audit::{AuditRecord, CallerUsage, Decision, UsageStats, UsageTotals};
pub use counters::StoreCounter;
pub use outbox::{FailureOutcome, Outbox};
pub use sessions::SessionRow;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(BridgeError::store)?;
        }
        let conn = Connection::open(path).map_err(BridgeError::store)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(BridgeError::store)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5)).map_err(BridgeError::store)?;
        schema::migrate(&conn).map_err(BridgeError::store)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Run `f` against the connection on the blocking pool.
    pub(crate) async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| BridgeError::StoreUnavailable("connection mutex poisoned".into()))?;
            f(&mut guard).map_err(BridgeError::store)
        })
        .await
        .map_err(|e| BridgeError::Internal(format!("store task failed: {e}")))?
    }

    pub async fn ping(&self) -> Result<()> {
        self.call(|c| c.query_row("SELECT 1", [], |r| r.get::<_, i64>(0)).map(|_| ())).await
    }
}
