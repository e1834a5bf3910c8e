//! Asynchronous audit trail.
//!
//! Callers hand records to a bounded queue and never wait on storage. One
//! writer task persists each record to the store and, when configured,
//! appends it to a JSONL mirror. Failures are logged and counted; they
//! never reach the request path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::obs::BridgeMetrics;
use crate::storage::{AuditRecord, SqliteStore};

#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::Sender<AuditRecord>,
    enqueue_timeout: Duration,
    metrics: Arc<BridgeMetrics>,
}

impl AuditLogger {
    /// Start the writer. It drains the queue and exits once `cancel` fires.
    pub fn spawn(
        store: SqliteStore,
        jsonl_path: Option<PathBuf>,
        capacity: usize,
        enqueue_timeout: Duration,
        metrics: Arc<BridgeMetrics>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let writer = AuditWriter { store, mirror: jsonl_path.map(JsonlMirror::new), metrics: Arc::clone(&metrics) };
        let handle = tokio::spawn(writer.run(rx, cancel));
        (Self { tx, enqueue_timeout, metrics }, handle)
    }

    /// Queue one record. Never blocks the caller and is safe to call from
    /// `Drop`, with or without a runtime.
    pub fn record(&self, rec: AuditRecord) {
        match self.tx.try_send(rec) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(rec)) => {
                let Ok(runtime) = Handle::try_current() else {
                    self.metrics.audit_dropped.inc(&[("reason", "queue_full")]);
                    tracing::warn!(caller = %rec.caller_id, "audit queue full outside the runtime; record dropped");
                    return;
                };
                // Bounded wait off the request path.
                let tx = self.tx.clone();
                let wait = self.enqueue_timeout;
                let metrics = Arc::clone(&self.metrics);
                runtime.spawn(async move {
                    if tx.send_timeout(rec, wait).await.is_err() {
                        metrics.audit_dropped.inc(&[("reason", "queue_full")]);
                        tracing::warn!(wait_ms = wait.as_millis() as u64, "audit queue full; record dropped");
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(rec)) => {
                self.metrics.audit_dropped.inc(&[("reason", "closed")]);
                tracing::warn!(caller = %rec.caller_id, endpoint = %rec.endpoint, "audit writer stopped; record dropped");
            }
        }
    }
}

struct AuditWriter {
    store: SqliteStore,
    mirror: Option<JsonlMirror>,
    metrics: Arc<BridgeMetrics>,
}

impl AuditWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<AuditRecord>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                r = rx.recv() => match r {
                    Some(rec) => self.write(rec).await,
                    None => break,
                },
                _ = cancel.cancelled() => {
                    rx.close();
                    while let Some(rec) = rx.recv().await {
                        self.write(rec).await;
                    }
                    break;
                }
            }
        }
        tracing::info!("audit writer flushed and stopped");
    }

    async fn write(&mut self, rec: AuditRecord) {
        if let Err(e) = self.store.insert_audit(&rec).await {
            self.metrics.audit_write_errors.inc(&[("sink", "store")]);
            tracing::error!(error = %e, caller = %rec.caller_id, "audit store write failed");
        }
        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = mirror.append(&rec).await {
                self.metrics.audit_write_errors.inc(&[("sink", "jsonl")]);
                tracing::error!(error = %e, path = %mirror.path.display(), "audit jsonl write failed");
            }
        }
    }
}

/// Append-only JSONL copy of the audit trail. The file is opened on first
/// write and kept open; after an I/O error it is reopened on the next one.
struct JsonlMirror {
    path: PathBuf,
    file: Option<File>,
}

impl JsonlMirror {
    fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    async fn append(&mut self, rec: &AuditRecord) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(rec)?;
        line.push(b'\n');
        let mut file = match self.file.take() {
            Some(f) => f,
            None => OpenOptions::new().create(true).append(true).open(&self.path).await?,
        };
        file.write_all(&line).await?;
        file.flush().await?;
        self.file = Some(file);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Decision;
    use chrono::Utc;

    fn rec(caller: &str) -> AuditRecord {
        AuditRecord {
            caller_id: caller.into(),
            endpoint: "claude/ask".into(),
            target: "claude".into(),
            priority: "normal".into(),
            decision: Decision::Admitted,
            reason: None,
            success: true,
            error: None,
            latency_ms: 3,
            cost_usd: 0.01,
            request_summary: "ping".into(),
            generation: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn flushes_store_and_mirror_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("audit.jsonl");
        let store = SqliteStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let (logger, handle) = AuditLogger::spawn(
            store.clone(),
            Some(mirror.clone()),
            16,
            Duration::from_millis(100),
            Arc::new(BridgeMetrics::default()),
            cancel.clone(),
        );

        for i in 0..5 {
            logger.record(rec(&format!("c{i}")));
        }
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(store.audit_count(None).await.unwrap(), 5);
        let lines = std::fs::read_to_string(&mirror).unwrap();
        assert_eq!(lines.lines().count(), 5);
        let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
        assert_eq!(first["decision"], "admitted");
    }

    #[tokio::test]
    async fn record_after_shutdown_is_dropped_not_panicking() {
        let store = SqliteStore::open_in_memory().unwrap();
        let cancel = CancellationToken::new();
        let metrics = Arc::new(BridgeMetrics::default());
        let (logger, handle) =
            AuditLogger::spawn(store, None, 1, Duration::from_millis(10), Arc::clone(&metrics), cancel.clone());
        cancel.cancel();
        handle.await.unwrap();
        logger.record(rec("late"));
        assert_eq!(metrics.audit_dropped.get(&[("reason", "closed")]), 1);
    }

    #[tokio::test]
    async fn mirror_failures_are_counted_and_the_file_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = dir.path().join("later").join("audit.jsonl");
        let store = SqliteStore::open_in_memory().unwrap();
        let metrics = Arc::new(BridgeMetrics::default());
        let mut writer = AuditWriter {
            store: store.clone(),
            mirror: Some(JsonlMirror::new(mirror.clone())),
            metrics: Arc::clone(&metrics),
        };

        writer.write(rec("early")).await;
        assert_eq!(metrics.audit_write_errors.get(&[("sink", "jsonl")]), 1);
        assert_eq!(store.audit_count(Some("early")).await.unwrap(), 1);

        std::fs::create_dir_all(mirror.parent().unwrap()).unwrap();
        writer.write(rec("a")).await;
        writer.write(rec("b")).await;
        assert_eq!(metrics.audit_write_errors.get(&[("sink", "jsonl")]), 1);
        let lines = std::fs::read_to_string(&mirror).unwrap();
        let callers: Vec<String> = lines
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["caller_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(callers, ["a", "b"]);
    }
}
