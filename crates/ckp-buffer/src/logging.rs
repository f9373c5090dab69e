//! File logging for detached flush workers, whose stderr goes nowhere.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const LOGS_DIR_NAME: &str = "logs";

/// Flush logs kept per session, counting the one being created.
pub const MAX_FLUSH_LOGS: usize = 10;

fn is_flush_log(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with("flush-") && name.ends_with(".log"))
}

/// Delete all but the newest `keep` flush logs in `log_dir`. Names embed a
/// sortable timestamp, so name order is age order. Returns how many were
/// removed; a file that cannot be removed is logged and skipped.
pub fn prune_flush_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let entries = match std::fs::read_dir(log_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => {
            return Err(e)
                .with_context(|| format!("Failed to list log directory: {}", log_dir.display()));
        }
    };
    let mut logs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| is_flush_log(path))
        .collect();
    if logs.len() <= keep {
        return Ok(0);
    }
    logs.sort();

    let mut removed = 0;
    for path in &logs[..logs.len() - keep] {
        match std::fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(err) => warn!(path = %path.display(), %err, "Failed to remove old flush log"),
        }
    }
    Ok(removed)
}

/// Create a non-blocking writer for `{session_dir}/logs/flush-{timestamp}.log`,
/// first pruning older logs down to [`MAX_FLUSH_LOGS`] including the new one.
///
/// The returned guard flushes pending lines when dropped, so the worker must
/// keep it alive until it exits.
pub fn create_flush_log_writer(
    session_dir: &Path,
) -> Result<(
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    let log_dir = session_dir.join(LOGS_DIR_NAME);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;
    prune_flush_logs(&log_dir, MAX_FLUSH_LOGS - 1)?;

    let file_name = format!("flush-{}.log", Utc::now().format("%Y%m%d-%H%M%S%.3f"));
    let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    Ok((non_blocking, guard))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_creates_flush_log_under_session() {
        let tmp = tempfile::tempdir().unwrap();
        let session_dir = tmp.path().join("sessions").join("s1");

        let (mut writer, guard) = create_flush_log_writer(&session_dir).unwrap();
        writer.write_all(b"flush started\n").unwrap();
        drop(writer);
        drop(guard);

        let entries: Vec<_> = std::fs::read_dir(session_dir.join(LOGS_DIR_NAME))
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(entries.len(), 1);

        let name = entries[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("flush-"), "unexpected log name {name}");
        assert!(name.ends_with(".log"), "unexpected log name {name}");
        assert_eq!(
            std::fs::read_to_string(&entries[0]).unwrap(),
            "flush started\n"
        );
    }

    #[test]
    fn test_prune_keeps_newest_flush_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let log_dir = tmp.path();
        for minute in 0..5 {
            std::fs::write(log_dir.join(format!("flush-20240501-12{minute:02}00.000.log")), "").unwrap();
        }
        std::fs::write(log_dir.join("notes.txt"), "keep me").unwrap();

        assert_eq!(prune_flush_logs(log_dir, 2).unwrap(), 3);

        let mut left: Vec<String> = std::fs::read_dir(log_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(
            left,
            vec![
                "flush-20240501-120300.000.log",
                "flush-20240501-120400.000.log",
                "notes.txt",
            ]
        );
        assert_eq!(prune_flush_logs(&log_dir.join("missing"), 2).unwrap(), 0);
    }

    #[test]
    fn test_new_writer_caps_log_count() {
        let tmp = tempfile::tempdir().unwrap();
        let session_dir = tmp.path().join("s1");
        let log_dir = session_dir.join(LOGS_DIR_NAME);
        std::fs::create_dir_all(&log_dir).unwrap();
        for n in 0..MAX_FLUSH_LOGS + 3 {
            std::fs::write(log_dir.join(format!("flush-20240101-0000{n:02}.000.log")), "").unwrap();
        }

        let (mut writer, guard) = create_flush_log_writer(&session_dir).unwrap();
        writer.write_all(b"flush started\n").unwrap();
        drop(writer);
        drop(guard);

        let count = std::fs::read_dir(&log_dir).unwrap().count();
        assert_eq!(count, MAX_FLUSH_LOGS);
        assert!(!log_dir.join("flush-20240101-000000.000.log").exists());
    }
}
