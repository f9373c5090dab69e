//! Flushing buffered records into the durable store.
//!
//! A flush renames `buffer.jsonl` to `buffer.flushing.jsonl` under the buffer
//! lock, so appends after the rename land in a fresh buffer. The snapshot is
//! then inserted in one transaction and deleted. If the process dies or the
//! insert fails, the snapshot stays behind. Because the flush lock is an
//! `flock`, a crashed flusher no longer holds it, and a later
//! [`SessionBuffer::process_orphaned_flushing_file`] can take it and finish
//! the job. Dedup in the store makes that retry safe.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ckp_lock::{LockHolder, SessionLock, acquire_lock, read_lock_holder, try_acquire_lock};
use ckp_store::{ContextStore, RecordSink};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffer::{
    BUFFER_FILE_NAME, FLUSH_LOCK_NAME, FLUSHING_FILE_NAME, SessionBuffer, read_records,
    with_buffer_lock,
};

pub const REASON_EMPTY_SESSION: &str = "empty session_id";
pub const REASON_NO_SESSION_DIR: &str = "session directory does not exist";
pub const REASON_FLUSH_IN_PROGRESS: &str = "another flush in progress";
pub const REASON_NOTHING_TO_FLUSH: &str = "nothing to flush";

/// Outcome of a flush request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    pub success: bool,
    pub entries_flushed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FlushResult {
    pub fn flushed(entries_flushed: usize) -> Self {
        Self {
            success: true,
            entries_flushed,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            entries_flushed: 0,
            reason: Some(reason.into()),
        }
    }

    /// Success with nothing flushed, e.g. an empty buffer or a worker that
    /// was only started.
    pub fn noted(reason: impl Into<String>) -> Self {
        Self {
            success: true,
            entries_flushed: 0,
            reason: Some(reason.into()),
        }
    }
}

/// A snapshot isolated by this process, with the flush lock that owns it.
struct IsolatedSnapshot {
    path: PathBuf,
    _lock: SessionLock,
}

enum Prepared {
    Finished(FlushResult),
    Isolated(IsolatedSnapshot),
}

impl SessionBuffer {
    /// Flush the session's buffer into the store on this thread.
    pub fn flush_sync(&self, session_id: &str) -> FlushResult {
        let snapshot = match self.isolate(session_id) {
            Prepared::Finished(result) => return result,
            Prepared::Isolated(snapshot) => snapshot,
        };
        match ContextStore::open(self.store_path()) {
            Ok(mut store) => complete(session_id, snapshot, &mut store),
            Err(err) => {
                warn!(session_id, error = %format!("{err:#}"), "Flush could not open store; snapshot retained");
                FlushResult::failed(format!("{err:#}"))
            }
        }
    }

    /// [`SessionBuffer::flush_sync`] into a caller-provided sink.
    pub fn flush_sync_into(&self, session_id: &str, sink: &mut dyn RecordSink) -> FlushResult {
        match self.isolate(session_id) {
            Prepared::Finished(result) => result,
            Prepared::Isolated(snapshot) => complete(session_id, snapshot, sink),
        }
    }

    /// Check preconditions, take the flush lock and rename the buffer aside.
    fn isolate(&self, session_id: &str) -> Prepared {
        if session_id.is_empty() {
            return Prepared::Finished(FlushResult::failed(REASON_EMPTY_SESSION));
        }
        let session_dir = match self.checked_session_dir(session_id) {
            Some(dir) if dir.is_dir() => dir,
            _ => return Prepared::Finished(FlushResult::failed(REASON_NO_SESSION_DIR)),
        };
        let snapshot_path = session_dir.join(FLUSHING_FILE_NAME);
        if snapshot_path.exists() {
            return Prepared::Finished(FlushResult::failed(REASON_FLUSH_IN_PROGRESS));
        }

        let lock = match try_acquire_lock(&session_dir, FLUSH_LOCK_NAME, "flush") {
            Ok(Some(lock)) => lock,
            Ok(None) => return Prepared::Finished(FlushResult::failed(REASON_FLUSH_IN_PROGRESS)),
            Err(err) => return Prepared::Finished(FlushResult::failed(format!("{err:#}"))),
        };
        // A flush may have finished its rename between the check and the lock.
        if snapshot_path.exists() {
            return Prepared::Finished(FlushResult::failed(REASON_FLUSH_IN_PROGRESS));
        }

        let buffer_path = session_dir.join(BUFFER_FILE_NAME);
        let renamed = with_buffer_lock(&session_dir, || {
            match fs::metadata(&buffer_path) {
                Ok(meta) if meta.len() > 0 => {}
                Ok(_) => return Ok(false),
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("Failed to stat buffer: {}", buffer_path.display())
                    });
                }
            }
            fs::rename(&buffer_path, &snapshot_path).with_context(|| {
                format!(
                    "Failed to rename {} to {}",
                    buffer_path.display(),
                    snapshot_path.display()
                )
            })?;
            Ok(true)
        });

        match renamed {
            Ok(true) => Prepared::Isolated(IsolatedSnapshot {
                path: snapshot_path,
                _lock: lock,
            }),
            Ok(false) => Prepared::Finished(FlushResult::noted(REASON_NOTHING_TO_FLUSH)),
            Err(err) => Prepared::Finished(FlushResult::failed(format!("{err:#}"))),
        }
    }

    /// Recover an orphaned snapshot left by a flush that never finished.
    ///
    /// Returns the number of newly stored records. Returns 0 when there is no
    /// snapshot, or when a live flush still owns it.
    pub fn process_orphaned_flushing_file(&self, session_id: &str) -> Result<usize> {
        let Some(lock) = self.claim_orphan(session_id)? else {
            return Ok(0);
        };
        let mut store = ContextStore::open(self.store_path())?;
        recover_snapshot(session_id, &self.flushing_path(session_id), lock, &mut store)
    }

    /// [`SessionBuffer::process_orphaned_flushing_file`] into a
    /// caller-provided sink.
    pub fn process_orphaned_flushing_file_into(
        &self,
        session_id: &str,
        sink: &mut dyn RecordSink,
    ) -> Result<usize> {
        let Some(lock) = self.claim_orphan(session_id)? else {
            return Ok(0);
        };
        recover_snapshot(session_id, &self.flushing_path(session_id), lock, sink)
    }

    /// Recover orphaned snapshots in every session, returning the total of
    /// newly stored records. A session that fails is logged and skipped.
    pub fn recover_all(&self) -> Result<usize> {
        let mut recovered = 0;
        for session_id in self.list_sessions()? {
            if !self.flush_in_progress(&session_id) {
                continue;
            }
            match self.process_orphaned_flushing_file(&session_id) {
                Ok(n) => recovered += n,
                Err(err) => {
                    warn!(session_id = %session_id, error = %format!("{err:#}"), "Orphan recovery failed");
                }
            }
        }
        Ok(recovered)
    }

    /// Keep flushes of `session_id` out while the returned guard lives.
    ///
    /// Fails, naming the holder, if a flush is running. `None` when the
    /// session has no directory, so there is nothing to flush anyway.
    pub fn hold_flush_lock(&self, session_id: &str, reason: &str) -> Result<Option<SessionLock>> {
        let Some(session_dir) = self.checked_session_dir(session_id) else {
            bail!("Invalid session id: '{session_id}'");
        };
        if !session_dir.is_dir() {
            return Ok(None);
        }
        acquire_lock(&session_dir, FLUSH_LOCK_NAME, reason).map(Some)
    }

    /// Diagnostic left by the last process to take the session's flush lock.
    pub fn last_flush_holder(&self, session_id: &str) -> Option<LockHolder> {
        let session_dir = self.checked_session_dir(session_id)?;
        read_lock_holder(&session_dir, FLUSH_LOCK_NAME)
    }

    /// Take the flush lock for a session whose snapshot has no live owner.
    fn claim_orphan(&self, session_id: &str) -> Result<Option<SessionLock>> {
        let Some(session_dir) = self.checked_session_dir(session_id) else {
            return Ok(None);
        };
        let snapshot_path = session_dir.join(FLUSHING_FILE_NAME);
        if !snapshot_path.is_file() {
            return Ok(None);
        }

        let Some(lock) = try_acquire_lock(&session_dir, FLUSH_LOCK_NAME, "orphan recovery")? else {
            debug!(session_id, "Snapshot owned by a live flush, leaving it");
            return Ok(None);
        };
        // The owner may have completed and deleted it before we got the lock.
        if !snapshot_path.is_file() {
            return Ok(None);
        }
        Ok(Some(lock))
    }
}

/// Insert an isolated snapshot and delete it. Any failure leaves the
/// snapshot for orphan recovery.
fn complete(session_id: &str, snapshot: IsolatedSnapshot, sink: &mut dyn RecordSink) -> FlushResult {
    match insert_and_remove(session_id, &snapshot.path, sink) {
        Ok(inserted) => {
            info!(session_id, entries_flushed = inserted, "Flushed session buffer");
            FlushResult::flushed(inserted)
        }
        Err(err) => {
            warn!(session_id, error = %format!("{err:#}"), "Flush failed; snapshot retained");
            FlushResult::failed(format!("{err:#}"))
        }
    }
}

fn recover_snapshot(
    session_id: &str,
    snapshot_path: &Path,
    _lock: SessionLock,
    sink: &mut dyn RecordSink,
) -> Result<usize> {
    let inserted = insert_and_remove(session_id, snapshot_path, sink)?;
    info!(session_id, recovered = inserted, "Recovered orphaned flush snapshot");
    Ok(inserted)
}

fn insert_and_remove(session_id: &str, snapshot_path: &Path, sink: &mut dyn RecordSink) -> Result<usize> {
    let records = read_records(snapshot_path)?;
    let inserted = sink
        .insert_batch(session_id, &records)
        .with_context(|| format!("Failed to store {} buffered records", records.len()))?;
    fs::remove_file(snapshot_path)
        .with_context(|| format!("Failed to remove snapshot: {}", snapshot_path.display()))?;
    debug!(session_id, parsed = records.len(), inserted, "Snapshot stored");
    Ok(inserted)
}
