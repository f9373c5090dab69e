//! Session id checks shared by the buffer and the store.

use crate::error::SessionIdError;

/// Session ids are opaque, but they name a directory under the sessions
/// root, so they must be a single normal path component.
pub fn validate_session_id(id: &str) -> Result<(), SessionIdError> {
    if id.is_empty() {
        return Err(SessionIdError::Empty);
    }
    if id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
        return Err(SessionIdError::NotAPathComponent(id.to_string()));
    }
    Ok(())
}
