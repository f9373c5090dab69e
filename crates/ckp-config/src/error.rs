#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Unknown config key '{0}'")]
    UnknownKey(String),

    #[error("Config key '{0}' is a section; set one of its fields instead")]
    NotALeaf(String),

    #[error("Invalid value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    #[error("Value for '{key}' out of range: {message}")]
    OutOfRange { key: String, message: String },
}
