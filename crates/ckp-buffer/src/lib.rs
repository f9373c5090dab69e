//! Per-session append buffer with atomic flush isolation into the durable
//! store, background flush launch and orphan recovery.

pub mod buffer;
pub mod flush;
pub mod launcher;
pub mod logging;

pub use buffer::{BUFFER_FILE_NAME, FLUSHING_FILE_NAME, SessionBuffer};
pub use flush::{
    FlushResult, REASON_EMPTY_SESSION, REASON_FLUSH_IN_PROGRESS, REASON_NO_SESSION_DIR,
    REASON_NOTHING_TO_FLUSH,
};
pub use launcher::FlushLauncher;
pub use logging::{LOGS_DIR_NAME, MAX_FLUSH_LOGS, create_flush_log_writer, prune_flush_logs};
