//! Live policy: one `Arc<PolicySnapshot>` swapped atomically on reload.
//!
//! Readers clone the `Arc` and evaluate against it for the whole decision,
//! so a reload racing with an admission can never produce a mixed view.
//! A reload parses and validates the complete file before the swap; on any
//! error the previous snapshot stays live.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use hermes_core::error::{BridgeError, Result};

use super::snapshot::{PolicyDocument, PolicySnapshot};

pub struct PolicyStore {
    current: RwLock<Arc<PolicySnapshot>>,
    generation: AtomicU64,
    path: Option<PathBuf>,
    last_mtime: Mutex<Option<SystemTime>>,
}

impl PolicyStore {
    /// Load from disk. A missing file is a startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mtime = file_mtime(&path);
        let doc = read_document(&path)?;
        let snapshot = PolicySnapshot::compile(doc, 1, Utc::now())?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(1),
            path: Some(path),
            last_mtime: Mutex::new(mtime),
        })
    }

    /// In-memory store with no backing file (tests, embedding).
    pub fn from_document(doc: PolicyDocument) -> Result<Self> {
        let snapshot = PolicySnapshot::compile(doc, 1, Utc::now())?;
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(1),
            path: None,
            last_mtime: Mutex::new(None),
        })
    }

    pub fn current(&self) -> Arc<PolicySnapshot> {
        match self.current.read() {
            Ok(g) => Arc::clone(&g),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    /// Build a snapshot from `doc` off-path, then swap. Returns the new generation.
    pub fn replace(&self, doc: PolicyDocument) -> Result<u64> {
        let mut snapshot = PolicySnapshot::compile(doc, 0, Utc::now())?;
        let next = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        snapshot.generation = next;
        let snapshot = Arc::new(snapshot);

        let mut slot = match self.current.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Concurrent replaces: the later reserved generation wins.
        if slot.generation < next {
            *slot = snapshot;
        }
        Ok(slot.generation)
    }

    /// Re-read the backing file unconditionally.
    pub fn reload(&self) -> Result<u64> {
        let Some(path) = &self.path else {
            return Err(BridgeError::BadRequest("policy store has no backing file".into()));
        };
        let mtime = file_mtime(path);
        let doc = read_document(path)?;
        let generation = self.replace(doc)?;
        if let Ok(mut m) = self.last_mtime.lock() {
            *m = mtime;
        }
        Ok(generation)
    }

    /// Reload only if the file's modification time moved. `Ok(None)` = unchanged.
    pub fn reload_if_changed(&self) -> Result<Option<u64>> {
        let Some(path) = &self.path else { return Ok(None) };
        let mtime = file_mtime(path);
        let changed = match self.last_mtime.lock() {
            Ok(mut last) => {
                if *last == mtime {
                    false
                } else {
                    // Record the attempt so a broken file is reported once, not every tick.
                    *last = mtime;
                    true
                }
            }
            Err(_) => false,
        };
        if !changed {
            return Ok(None);
        }
        let doc = read_document(path)?;
        self.replace(doc).map(Some)
    }

    /// Poll the backing file until cancelled.
    pub fn spawn_watcher(self: Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                match self.reload_if_changed() {
                    Ok(Some(generation)) => tracing::info!(generation, "policy reloaded"),
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, generation = self.generation(), "policy reload rejected; keeping previous snapshot"),
                }
            }
            tracing::debug!("policy watcher stopped");
        })
    }
}

fn read_document(path: &Path) -> Result<PolicyDocument> {
    let s = std::fs::read_to_string(path).map_err(|e| {
        BridgeError::BadRequest(format!("read policy failed ({}): {e}", path.display()))
    })?;
    PolicyDocument::parse(&s)
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}
