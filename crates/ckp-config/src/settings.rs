use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// All tunables, persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub buffer: BufferSettings,
    pub restoration: RestorationSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Buffered record count at which `append` triggers a flush.
    pub flush_threshold: u32,
    /// Age in seconds of the oldest buffered record that triggers a flush.
    pub flush_interval_secs: u64,
    /// Flush in a detached worker instead of inline when a flush is due.
    pub async_flush: bool,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            flush_threshold: 20,
            flush_interval_secs: 300,
            async_flush: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestorationSettings {
    /// Maximum estimated tokens in a restored context bundle.
    pub token_budget: u32,
    /// Context usage (percent of the host window) at which the host should
    /// checkpoint and restore.
    pub context_threshold_percent: u8,
    pub decision_limit: u32,
    pub learnings_limit: u32,
    pub file_edits_limit: u32,
    pub medium_decisions_limit: u32,
}

impl Default for RestorationSettings {
    fn default() -> Self {
        Self {
            token_budget: 4000,
            context_threshold_percent: 80,
            decision_limit: 10,
            learnings_limit: 10,
            file_edits_limit: 10,
            medium_decisions_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Database file; `None` means `{data_root}/context.db`.
    pub db_path: Option<PathBuf>,
    /// Default maximum number of search hits.
    pub search_limit: u32,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            search_limit: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

fn positive(key: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::OutOfRange {
            key: key.to_string(),
            message: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

impl Settings {
    /// Check every range rule. Returns the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("buffer.flush_threshold", self.buffer.flush_threshold.into())?;
        positive("buffer.flush_interval_secs", self.buffer.flush_interval_secs)?;
        positive("restoration.token_budget", self.restoration.token_budget.into())?;
        positive("storage.search_limit", self.storage.search_limit.into())?;

        let percent = self.restoration.context_threshold_percent;
        if percent > 100 {
            return Err(ConfigError::OutOfRange {
                key: "restoration.context_threshold_percent".to_string(),
                message: format!("must be between 0 and 100, got {percent}"),
            });
        }

        if self
            .storage
            .db_path
            .as_ref()
            .is_some_and(|path| path.as_os_str().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                key: "storage.db_path".to_string(),
                message: "must not be empty; use null for the default location".to_string(),
            });
        }

        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "expected one of {}, got '{}'",
                    LOG_LEVELS.join(", "),
                    self.logging.level
                ),
            });
        }

        Ok(())
    }

    /// Load from `path`. A missing file yields defaults; an unreadable,
    /// malformed or out-of-range file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read settings: {}", path.display()));
            }
        };

        let settings: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Write atomically (temp file + rename) as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        writeln!(tmp, "{json}").context("Failed to write temp settings file")?;
        tmp.persist(path)
            .with_context(|| format!("Failed to persist settings to {}", path.display()))?;
        Ok(())
    }

    /// Read a value by dotted key path, e.g. `restoration.decision_limit`.
    /// A section path returns the whole section as an object.
    pub fn get(&self, key: &str) -> Result<serde_json::Value, ConfigError> {
        let root = self.to_tree()?;
        resolve_key(&root, key)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownKey(key.to_string()))
    }

    /// Set a leaf value by dotted key path.
    ///
    /// `raw` is read as JSON (`42`, `true`, `null`, `"text"`); for string or
    /// nullable keys bare text is accepted too. On any error `self` is left
    /// unchanged.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let mut root = self.to_tree()?;
        let slot =
            resolve_key_mut(&mut root, key).ok_or_else(|| ConfigError::UnknownKey(key.to_string()))?;
        if slot.is_object() {
            return Err(ConfigError::NotALeaf(key.to_string()));
        }
        *slot = parse_raw_value(slot, raw);

        let updated: Settings =
            serde_json::from_value(root).map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        updated.validate()?;
        *self = updated;
        Ok(())
    }

    /// All leaf keys in dotted form, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Ok(root) = self.to_tree() {
            collect_keys(&root, "", &mut keys);
        }
        keys
    }

    fn to_tree(&self) -> Result<serde_json::Value, ConfigError> {
        serde_json::to_value(self).map_err(|e| ConfigError::InvalidValue {
            key: String::new(),
            message: e.to_string(),
        })
    }
}

/// Navigate a JSON value by dotted key path (e.g. "buffer.flush_threshold").
fn resolve_key<'a>(root: &'a serde_json::Value, key: &str) -> Option<&'a serde_json::Value> {
    let mut current = root;
    for part in key.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn resolve_key_mut<'a>(
    root: &'a mut serde_json::Value,
    key: &str,
) -> Option<&'a mut serde_json::Value> {
    let mut current = root;
    for part in key.split('.') {
        current = current.as_object_mut()?.get_mut(part)?;
    }
    Some(current)
}

fn parse_raw_value(current: &serde_json::Value, raw: &str) -> serde_json::Value {
    let parsed = serde_json::from_str::<serde_json::Value>(raw);
    let text_slot = current.is_string() || current.is_null();
    match parsed {
        Ok(value) if !text_slot || value.is_string() || value.is_null() => value,
        _ => serde_json::Value::String(raw.to_string()),
    }
}

fn collect_keys(value: &serde_json::Value, prefix: &str, out: &mut Vec<String>) {
    match value.as_object() {
        Some(map) => {
            for (name, child) in map {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                collect_keys(child, &path, out);
            }
        }
        None => out.push(prefix.to_string()),
    }
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
