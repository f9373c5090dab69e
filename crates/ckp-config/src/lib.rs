//! Settings (`settings.json`) and resolved filesystem paths.

pub mod error;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use paths::KeeperPaths;
pub use settings::{
    BufferSettings, LoggingSettings, RestorationSettings, Settings, StorageSettings,
};
