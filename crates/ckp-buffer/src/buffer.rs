//! Per-session append-only JSONL buffer.
//!
//! Layout under `{sessions_dir}/{session_id}/`:
//! - `buffer.jsonl`: one [`Record`] per line, appended by producers;
//! - `buffer.flushing.jsonl`: the snapshot isolated by an in-flight flush;
//! - `locks/buffer.lock`: serializes appends against the flush rename;
//! - `locks/flush.lock`: held for the whole of a flush.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use ckp_config::{BufferSettings, KeeperPaths, Settings};
use ckp_core::{Record, validate_session_id};
use tracing::{debug, warn};

use crate::launcher::FlushLauncher;

pub const BUFFER_FILE_NAME: &str = "buffer.jsonl";
pub const FLUSHING_FILE_NAME: &str = "buffer.flushing.jsonl";
pub(crate) const BUFFER_LOCK_NAME: &str = "buffer";
pub(crate) const FLUSH_LOCK_NAME: &str = "flush";

/// Handle on every session buffer under one sessions directory.
///
/// Cheap to clone; holds paths only. Each operation opens what it needs.
#[derive(Debug, Clone)]
pub struct SessionBuffer {
    sessions_dir: PathBuf,
    store_path: PathBuf,
    launcher: FlushLauncher,
}

impl SessionBuffer {
    /// Buffer rooted at `sessions_dir`, flushing into the database at
    /// `store_path`. Background flushes run on a thread until
    /// [`SessionBuffer::with_launcher`] says otherwise.
    pub fn new(sessions_dir: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            store_path: store_path.into(),
            launcher: FlushLauncher::default(),
        }
    }

    pub fn from_paths(paths: &KeeperPaths, settings: &Settings) -> Self {
        Self::new(paths.sessions_dir(), paths.db_path(settings))
    }

    pub fn with_launcher(mut self, launcher: FlushLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    pub fn launcher(&self) -> &FlushLauncher {
        &self.launcher
    }

    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir.join(session_id)
    }

    pub fn buffer_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(BUFFER_FILE_NAME)
    }

    pub fn flushing_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(FLUSHING_FILE_NAME)
    }

    /// Session directory for `session_id`, or `None` if the id cannot name
    /// one.
    pub(crate) fn checked_session_dir(&self, session_id: &str) -> Option<PathBuf> {
        match validate_session_id(session_id) {
            Ok(()) => Some(self.session_dir(session_id)),
            Err(err) => {
                debug!(session_id, %err, "Rejected session id");
                None
            }
        }
    }

    /// Append one record. Returns `false`, with no side effect, when the
    /// session id is unusable or the record is invalid.
    pub fn append(&self, session_id: &str, record: &Record) -> Result<bool> {
        self.append_many(session_id, std::slice::from_ref(record))
            .map(|appended| appended == 1)
    }

    /// Append every valid record under one lock, returning how many were
    /// written. Invalid records are skipped.
    pub fn append_many(&self, session_id: &str, records: &[Record]) -> Result<usize> {
        let Some(session_dir) = self.checked_session_dir(session_id) else {
            return Ok(0);
        };

        let mut payload = String::new();
        let mut appended = 0;
        for record in records {
            if let Err(reason) = record.validate() {
                debug!(session_id, %reason, "Skipping invalid record");
                continue;
            }
            let line = record
                .to_json_line()
                .context("Failed to serialize record")?;
            payload.push_str(&line);
            payload.push('\n');
            appended += 1;
        }
        if appended == 0 {
            return Ok(0);
        }

        fs::create_dir_all(&session_dir).with_context(|| {
            format!("Failed to create session directory: {}", session_dir.display())
        })?;
        let buffer_path = session_dir.join(BUFFER_FILE_NAME);
        with_buffer_lock(&session_dir, || {
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&buffer_path)
                .with_context(|| format!("Failed to open buffer: {}", buffer_path.display()))?;
            file.write_all(payload.as_bytes())
                .with_context(|| format!("Failed to append to buffer: {}", buffer_path.display()))
        })?;

        debug!(session_id, appended, "Appended records");
        Ok(appended)
    }

    /// Buffered records, oldest first. Lines that fail to parse are skipped.
    pub fn read(&self, session_id: &str) -> Result<Vec<Record>> {
        let Some(session_dir) = self.checked_session_dir(session_id) else {
            return Ok(Vec::new());
        };
        let buffer_path = session_dir.join(BUFFER_FILE_NAME);
        if !buffer_path.exists() {
            return Ok(Vec::new());
        }
        with_buffer_lock(&session_dir, || read_records(&buffer_path))
    }

    pub fn count(&self, session_id: &str) -> Result<usize> {
        Ok(self.read(session_id)?.len())
    }

    /// Whether the session has a buffer file.
    pub fn exists(&self, session_id: &str) -> bool {
        self.checked_session_dir(session_id)
            .is_some_and(|dir| dir.join(BUFFER_FILE_NAME).is_file())
    }

    /// Delete the buffer file. Idempotent: `true` whether or not there was
    /// one; `false` only for an unusable session id.
    pub fn clear(&self, session_id: &str) -> Result<bool> {
        let Some(session_dir) = self.checked_session_dir(session_id) else {
            return Ok(false);
        };
        if !session_dir.is_dir() {
            return Ok(true);
        }
        let buffer_path = session_dir.join(BUFFER_FILE_NAME);
        with_buffer_lock(&session_dir, || match fs::remove_file(&buffer_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove buffer: {}", buffer_path.display())),
        })?;
        Ok(true)
    }

    /// Whether a flush snapshot exists for the session, live or orphaned.
    pub fn flush_in_progress(&self, session_id: &str) -> bool {
        self.checked_session_dir(session_id)
            .is_some_and(|dir| dir.join(FLUSHING_FILE_NAME).is_file())
    }

    /// Ids of every session directory, sorted.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "Failed to list sessions in {}",
                        self.sessions_dir.display()
                    )
                });
            }
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.context("Failed to read sessions directory entry")?;
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_session_id(&name).is_ok() => sessions.push(name),
                Ok(_) => {}
                Err(name) => {
                    warn!(name = ?name, "Skipping session directory with non-UTF-8 name");
                }
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// Whether the buffer has reached the flush threshold or its oldest
    /// record has waited at least the flush interval.
    pub fn flush_due(&self, session_id: &str, settings: &BufferSettings) -> Result<bool> {
        let records = self.read(session_id)?;
        let threshold = usize::try_from(settings.flush_threshold).unwrap_or(usize::MAX);
        if !records.is_empty() && records.len() >= threshold {
            return Ok(true);
        }

        let Some(oldest) = records.iter().map(|r| r.created_at).min() else {
            return Ok(false);
        };
        let age_secs = (Utc::now() - oldest).num_seconds();
        let interval = i64::try_from(settings.flush_interval_secs).unwrap_or(i64::MAX);
        Ok(age_secs >= interval)
    }
}

/// Run `f` while holding the exclusive buffer lock of `session_dir`.
pub(crate) fn with_buffer_lock<T>(session_dir: &Path, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let lock_path = ckp_lock::lock_path(session_dir, BUFFER_LOCK_NAME);
    if let Some(locks_dir) = lock_path.parent() {
        fs::create_dir_all(locks_dir).with_context(|| {
            format!("Failed to create locks directory: {}", locks_dir.display())
        })?;
    }
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock
        .write()
        .map_err(|e| anyhow::anyhow!("Failed to acquire buffer lock: {e}"))?;

    f()
}

/// Parse a JSONL record file, skipping blank and unparseable lines.
pub(crate) fn read_records(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            warn!(path = %path.display(), line = index + 1, "Skipping blank buffer line");
            continue;
        }
        match Record::from_json_line(&line) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(path = %path.display(), line = index + 1, %err, "Skipping unreadable buffer line");
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
