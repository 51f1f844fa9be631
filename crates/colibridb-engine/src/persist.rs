//! Debounced atomic snapshot persistence.
//!
//! Each collection gets one background task. A mutation arms the task
//! through a [`Notify`]; the task then waits out the debounce window,
//! restarting it on every further arm, and writes the snapshot:
//! serialize to `{name}.json.tmp`, then atomically rename over
//! `{name}.json`. Reads and writes never wait on any of this.
//!
//! Failures leave the collection dirty, re-arm the timer, and are surfaced
//! on the engine's error channel.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use colibridb_common::{ColibriError, Document, Result};

use crate::store::collection::Collection;

// Persistence slot

/// Per-collection persistence plumbing, owned by the [`Collection`].
pub struct PersistSlot {
    /// Snapshot target, `{storage}/{name}.json`.
    pub(crate) file: PathBuf,
    /// Armed by every mutation; wakes or extends the debounce window.
    pub(crate) notify: Arc<Notify>,
    /// Stops the background task.
    pub(crate) cancel: CancellationToken,
    /// Single-flight guard for the actual write.
    saving: AtomicBool,
    /// Handle of the spawned task, joined on close.
    pub(crate) task: Mutex<Option<JoinHandle<()>>>,
}

impl PersistSlot {
    pub(crate) fn new(file: PathBuf) -> Self {
        Self {
            file,
            notify: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            saving: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Arm (or extend) the debounce timer.
    pub(crate) fn arm(&self) {
        self.notify.notify_one();
    }
}

/// A persister failure, delivered on the engine's error channel.
#[derive(Debug, Clone)]
pub struct PersistFailure {
    pub collection: String,
    pub error: ColibriError,
}

// Files

/// Snapshot path for a collection.
pub fn collection_file(storage: &Path, name: &str) -> PathBuf {
    storage.join(format!("{name}.json"))
}

fn tmp_file(file: &Path) -> PathBuf {
    file.with_extension("json.tmp")
}

/// Read a snapshot file if it exists.
pub fn load_documents(file: &Path) -> Result<Option<Vec<Document>>> {
    match std::fs::read_to_string(file) {
        Ok(text) => {
            let docs: Vec<Document> = serde_json::from_str(&text).map_err(|e| {
                ColibriError::Io(format!("corrupt snapshot {}: {e}", file.display()))
            })?;
            Ok(Some(docs))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// Snapshot writing

/// Write one snapshot now, if no other write is in flight.
///
/// Returns false when a concurrent save was detected (the timer is re-armed
/// so the skipped work happens shortly after).
pub async fn snapshot(collection: &Collection) -> Result<bool> {
    if collection.persist.saving.swap(true, Ordering::Acquire) {
        collection.persist.arm();
        return Ok(false);
    }

    let result = write_snapshot(collection).await;
    collection.persist.saving.store(false, Ordering::Release);
    result.map(|_| true)
}

async fn write_snapshot(collection: &Collection) -> Result<()> {
    // Everything completed before this point is in the snapshot.
    let (docs, epoch) = {
        let state = collection.state.read();
        (state.snapshot_documents(), state.epoch)
    };

    let json = serde_json::to_string_pretty(&docs)?;
    let tmp = tmp_file(&collection.persist.file);

    tokio::fs::write(&tmp, json.as_bytes()).await.map_err(|e| {
        ColibriError::Io(format!("writing {}: {e}", tmp.display()))
    })?;
    tokio::fs::rename(&tmp, &collection.persist.file)
        .await
        .map_err(|e| {
            ColibriError::Io(format!(
                "renaming {} into place: {e}",
                collection.persist.file.display()
            ))
        })?;

    {
        let mut state = collection.state.write();
        // A mutation that landed mid-write keeps the collection dirty.
        if state.epoch == epoch {
            state.dirty = false;
        }
        state.last_save = Some(Utc::now());
    }

    debug!(
        collection = %collection.name,
        documents = docs.len(),
        "snapshot written"
    );
    Ok(())
}

/// Remove a collection's snapshot file; absent files are fine.
pub async fn remove_snapshot(file: &Path) -> Result<bool> {
    match tokio::fs::remove_file(file).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(ColibriError::Io(format!(
            "removing {}: {e}",
            file.display()
        ))),
    }
}

// Background task

/// Spawn the debounced persister task for a collection.
pub fn spawn_persister(
    collection: Arc<Collection>,
    delay: Duration,
    errors: UnboundedSender<PersistFailure>,
) {
    let notify = collection.persist.notify.clone();
    let cancel = collection.persist.cancel.clone();
    let target = collection.clone();

    let handle = tokio::spawn(async move {
        loop {
            // Wait to be armed
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = notify.notified() => {}
            }

            // Debounce: every further arm restarts the window
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = notify.notified() => continue,
                    _ = tokio::time::sleep(delay) => break,
                }
            }

            if !target.state.read().dirty {
                continue;
            }

            if let Err(err) = snapshot(&target).await {
                error!(collection = %target.name, error = %err, "snapshot failed");
                let _ = errors.send(PersistFailure {
                    collection: target.name.clone(),
                    error: err,
                });
                // Dirty is still set; try again after another window.
                target.persist.arm();
            }
        }
    });

    *collection.persist.task.lock() = Some(handle);
}

/// Cancel a collection's persister and wait for the task to exit.
pub async fn shutdown_persister(collection: &Collection) {
    collection.persist.cancel.cancel();
    let handle = collection.persist.task.lock().take();
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}
