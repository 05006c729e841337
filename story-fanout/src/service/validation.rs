//! Request validation shared by the service operations.

use crate::errors::FanoutError;

/// Longest accepted user id, in bytes.
pub const MAX_USER_ID_LEN: usize = 128;

/// Validate a user id supplied by a caller.
///
/// Ids must be non-blank, at most [`MAX_USER_ID_LEN`] bytes, and free of
/// control characters.
pub fn validate_user_id(id: &str, field: &str) -> Result<(), FanoutError> {
    if id.trim().is_empty() {
        return Err(FanoutError::invalid_input(format!("{field} is required")));
    }
    if id.len() > MAX_USER_ID_LEN {
        return Err(FanoutError::invalid_input(format!(
            "{field} exceeds {MAX_USER_ID_LEN} bytes"
        )));
    }
    if id.chars().any(char::is_control) {
        return Err(FanoutError::invalid_input(format!(
            "{field} contains control characters"
        )));
    }
    Ok(())
}
