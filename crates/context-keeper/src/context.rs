//! Per-invocation state: resolved paths and loaded settings, built once in
//! `main` and passed to every handler.

use anyhow::Result;
use ckp_buffer::{FlushLauncher, FlushResult, SessionBuffer};
use ckp_config::{KeeperPaths, Settings};
use ckp_core::OutputFormat;
use ckp_store::ContextStore;
use tracing::warn;

pub(crate) struct AppContext {
    pub paths: KeeperPaths,
    pub settings: Settings,
    pub format: OutputFormat,
}

impl AppContext {
    pub fn load(paths: KeeperPaths, format: OutputFormat) -> Result<Self> {
        let settings = Settings::load(paths.config_path())?;
        Ok(Self {
            paths,
            settings,
            format,
        })
    }

    /// Buffer whose background flushes re-invoke this binary as a hidden
    /// `flush-worker` against the same root and settings file.
    pub fn buffer(&self) -> SessionBuffer {
        let buffer = SessionBuffer::from_paths(&self.paths, &self.settings);
        match std::env::current_exe() {
            Ok(program) => buffer.with_launcher(FlushLauncher::Process {
                program,
                args: vec![
                    "--root".to_string(),
                    self.paths.data_root().display().to_string(),
                    "--config".to_string(),
                    self.paths.config_path().display().to_string(),
                    "flush-worker".to_string(),
                ],
            }),
            Err(e) => {
                warn!("Cannot locate own executable ({e}); flushes will run inline");
                buffer
            }
        }
    }

    pub fn open_store(&self) -> Result<ContextStore> {
        ContextStore::open(&self.paths.db_path(&self.settings))
    }

    /// Flush in the background when asked and possible, otherwise inline.
    /// A thread launcher would die with this short-lived process, so it
    /// always means inline here.
    pub fn flush(&self, buffer: &SessionBuffer, session_id: &str, run_async: bool) -> FlushResult {
        let detached = matches!(buffer.launcher(), FlushLauncher::Process { .. });
        if run_async && detached {
            buffer.flush_async(session_id)
        } else {
            buffer.flush_sync(session_id)
        }
    }
}
