use std::path::{Path, PathBuf};

use crate::settings::Settings;

/// XDG app name used for state and config directories.
pub const APP_NAME: &str = "context-keeper";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DEFAULT_DB_FILE_NAME: &str = "context.db";
pub const SESSIONS_DIR_NAME: &str = "sessions";

/// Filesystem locations for one process, resolved once and passed down.
///
/// Nothing below this type reads environment variables or XDG dirs, so
/// tests get full isolation by building one with [`KeeperPaths::with_root`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperPaths {
    data_root: PathBuf,
    config_path: PathBuf,
}

fn project_state_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| {
        dirs.state_dir()
            .unwrap_or_else(|| dirs.data_local_dir())
            .to_path_buf()
    })
}

fn project_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn state_dir_fallback() -> PathBuf {
    std::env::temp_dir().join(format!("{APP_NAME}-state"))
}

impl KeeperPaths {
    /// Everything (sessions, database, settings) under a single directory.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let data_root = root.into();
        Self {
            config_path: data_root.join(SETTINGS_FILE_NAME),
            data_root,
        }
    }

    /// Resolve paths for a real invocation.
    ///
    /// An explicit root keeps the settings file inside it; otherwise data goes
    /// to the XDG state dir and settings to the XDG config dir. An explicit
    /// config path wins over both.
    pub fn resolve(root_override: Option<&Path>, config_override: Option<&Path>) -> Self {
        let mut paths = match root_override {
            Some(root) => Self::with_root(root),
            None => {
                let data_root = project_state_dir().unwrap_or_else(state_dir_fallback);
                let config_path = project_config_dir()
                    .map(|dir| dir.join(SETTINGS_FILE_NAME))
                    .unwrap_or_else(|| data_root.join(SETTINGS_FILE_NAME));
                Self {
                    data_root,
                    config_path,
                }
            }
        };
        if let Some(config_path) = config_override {
            paths.config_path = config_path.to_path_buf();
        }
        paths
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.data_root.join(SESSIONS_DIR_NAME)
    }

    /// Durable store location: `storage.db_path` if set (relative paths are
    /// taken from the data root), else `{data_root}/context.db`.
    pub fn db_path(&self, settings: &Settings) -> PathBuf {
        match &settings.storage.db_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.data_root.join(path),
            None => self.data_root.join(DEFAULT_DB_FILE_NAME),
        }
    }
}
