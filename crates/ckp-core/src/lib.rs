//! Record model shared by the session buffer and the durable store.

pub mod error;
pub mod record;
pub mod session_id;
pub mod types;

pub use error::{RecordError, SessionIdError};
pub use record::{EnhancedFields, Record};
pub use session_id::validate_session_id;
pub use types::{EntryType, Importance, OutputFormat, Source};
