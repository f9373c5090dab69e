/// Reasons a record is refused by the buffer or the store.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record content is empty")]
    EmptyContent,

    #[error("unknown entry type '{0}'")]
    UnknownEntryType(String),

    #[error("unknown importance '{0}': expected high, medium or low")]
    UnknownImportance(String),

    #[error("unknown source '{0}': expected user or assistant")]
    UnknownSource(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionIdError {
    #[error("empty session_id")]
    Empty,

    #[error("session_id '{0}' cannot be used as a directory name")]
    NotAPathComponent(String),
}
