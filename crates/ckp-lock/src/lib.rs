//! Named advisory locks under a session directory, via `flock(2)`.
//!
//! A lock lives at `{session_dir}/locks/{name}.lock`. `flock` locks belong to
//! the open file description, so they are released when the holder drops the
//! guard or when its process dies. That second property is what lets a later
//! process tell a crashed flush from a running one.
//!
//! The raw `libc::flock` call is used instead of an RAII wrapper so the guard
//! can own the `File` directly without borrowing from a lock object.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

pub const LOCKS_DIR_NAME: &str = "locks";

/// Diagnostic payload written into a held lock file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub name: String,
    pub acquired_at: DateTime<Utc>,
    pub reason: String,
}

/// Guard for an acquired lock. Releases on drop.
pub struct SessionLock {
    file: File,
    lock_path: PathBuf,
}

impl std::fmt::Debug for SessionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is a valid descriptor owned by `self.file`. If unlock
        // fails the lock still goes away when the fd closes right after.
        unsafe {
            libc::flock(fd, libc::LOCK_UN);
        }
    }
}

impl SessionLock {
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Path of the lock file for `name` under `session_dir`.
pub fn lock_path(session_dir: &Path, name: &str) -> PathBuf {
    session_dir
        .join(LOCKS_DIR_NAME)
        .join(format!("{name}.lock"))
}

/// Try to take the lock without blocking.
///
/// Returns `Ok(None)` when another open file description holds it. Other
/// failures (cannot create the locks dir, bad fd) are errors.
pub fn try_acquire_lock(
    session_dir: &Path,
    name: &str,
    reason: &str,
) -> Result<Option<SessionLock>> {
    let lock_path = lock_path(session_dir, name);
    let file = open_lock_file(&lock_path)?;

    if !flock_exclusive_nonblocking(&file)
        .with_context(|| format!("flock failed on {}", lock_path.display()))?
    {
        return Ok(None);
    }

    let mut lock = SessionLock { file, lock_path };
    write_holder(&mut lock, name, reason)?;
    Ok(Some(lock))
}

/// Take the lock or fail with a message naming the current holder.
pub fn acquire_lock(session_dir: &Path, name: &str, reason: &str) -> Result<SessionLock> {
    match try_acquire_lock(session_dir, name, reason)? {
        Some(lock) => Ok(lock),
        None => match read_lock_holder(session_dir, name) {
            Some(holder) => bail!(
                "Lock '{}' held by PID {} (reason: {}, acquired: {})",
                holder.name,
                holder.pid,
                holder.reason,
                holder.acquired_at
            ),
            None => bail!("Lock '{name}' is held (unable to read holder info)"),
        },
    }
}

/// Last diagnostic written to the lock file, if any.
///
/// The file outlives the lock, so this is the *last* holder; pair it with
/// [`try_acquire_lock`] to know whether it is still held.
pub fn read_lock_holder(session_dir: &Path, name: &str) -> Option<LockHolder> {
    let contents = fs::read_to_string(lock_path(session_dir, name)).ok()?;
    serde_json::from_str(&contents).ok()
}

fn open_lock_file(lock_path: &Path) -> Result<File> {
    if let Some(locks_dir) = lock_path.parent() {
        fs::create_dir_all(locks_dir).with_context(|| {
            format!("Failed to create locks directory: {}", locks_dir.display())
        })?;
    }

    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))
}

fn flock_exclusive_nonblocking(file: &File) -> io::Result<bool> {
    let fd = file.as_raw_fd();
    // SAFETY: `fd` comes from a `File` that stays alive for the call.
    let ret = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if ret == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

fn write_holder(lock: &mut SessionLock, name: &str, reason: &str) -> Result<()> {
    let holder = LockHolder {
        pid: std::process::id(),
        name: name.to_string(),
        acquired_at: Utc::now(),
        reason: reason.to_string(),
    };
    let json = serde_json::to_string(&holder).context("Failed to serialize lock holder")?;

    lock.file.set_len(0).context("Failed to truncate lock file")?;
    lock.file
        .write_all(json.as_bytes())
        .context("Failed to write lock holder")?;
    lock.file.flush().context("Failed to flush lock file")?;
    Ok(())
}
