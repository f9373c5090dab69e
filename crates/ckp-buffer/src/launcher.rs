//! Detached background flushes.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

use tracing::{info, warn};

use crate::buffer::SessionBuffer;
use crate::flush::{FlushResult, REASON_EMPTY_SESSION, REASON_FLUSH_IN_PROGRESS, REASON_NO_SESSION_DIR};

/// How [`SessionBuffer::flush_async`] runs the flush.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FlushLauncher {
    /// Spawn `program args... <session_id>` detached from this process, for
    /// short-lived callers that exit before the flush completes. The program
    /// is expected to run [`SessionBuffer::flush_sync`] for that session.
    /// A caller that stays alive has the child reaped on a waiter thread.
    Process { program: PathBuf, args: Vec<String> },
    /// Run the flush on a detached thread of this process.
    #[default]
    Thread,
}

/// Wait on the child from a detached thread so a long-lived caller does not
/// accumulate zombies. If this process exits first, init adopts the child.
fn reap_in_background(mut child: Child) {
    let pid = child.id();
    let spawned = std::thread::Builder::new()
        .name(format!("ckp-reap-{pid}"))
        .spawn(move || match child.wait() {
            Ok(status) if !status.success() => {
                warn!(pid, %status, "Background flush process exited with failure");
            }
            Ok(_) => {}
            Err(err) => warn!(pid, %err, "Failed to wait for background flush process"),
        });
    if let Err(err) = spawned {
        warn!(pid, %err, "Failed to start reaper thread for flush process");
    }
}

impl SessionBuffer {
    /// Start a flush in the background and return without waiting.
    ///
    /// Success means the worker started; the reason names it (pid or thread
    /// name). The worker's own outcome goes to its log.
    pub fn flush_async(&self, session_id: &str) -> FlushResult {
        if session_id.is_empty() {
            return FlushResult::failed(REASON_EMPTY_SESSION);
        }
        match self.checked_session_dir(session_id) {
            Some(dir) if dir.is_dir() => {}
            _ => return FlushResult::failed(REASON_NO_SESSION_DIR),
        }
        if self.flush_in_progress(session_id) {
            return FlushResult::failed(REASON_FLUSH_IN_PROGRESS);
        }

        match self.launcher() {
            FlushLauncher::Process { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args)
                    .arg(session_id)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());

                // New process group: a Ctrl-C aimed at the caller must not
                // reach the worker.
                #[cfg(unix)]
                {
                    use std::os::unix::process::CommandExt;
                    cmd.process_group(0);
                }

                match cmd.spawn() {
                    Ok(child) => {
                        let pid = child.id();
                        reap_in_background(child);
                        info!(session_id, pid, "Started background flush process");
                        FlushResult::noted(format!("flush started in process {pid}"))
                    }
                    Err(err) => {
                        warn!(session_id, program = %program.display(), %err, "Failed to spawn flush process");
                        FlushResult::failed(format!(
                            "failed to spawn {}: {err}",
                            program.display()
                        ))
                    }
                }
            }
            FlushLauncher::Thread => {
                let name = format!("ckp-flush-{session_id}");
                let buffer = self.clone();
                let id = session_id.to_string();
                let spawned = std::thread::Builder::new().name(name.clone()).spawn(move || {
                    let result = buffer.flush_sync(&id);
                    if !result.success {
                        warn!(session_id = %id, reason = ?result.reason, "Background flush failed");
                    }
                });
                match spawned {
                    Ok(_) => {
                        info!(session_id, thread = %name, "Started background flush thread");
                        FlushResult::noted(format!("flush started in thread {name}"))
                    }
                    Err(err) => FlushResult::failed(format!("failed to spawn flush thread: {err}")),
                }
            }
        }
    }
}
