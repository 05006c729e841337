//! Utility functions shared by the store backends.

use story_fanout_shared::{FollowerCursor, NotificationEntry};

use crate::config::StoreConfig;
use crate::errors::StoreError;

const CURSOR_PREFIX: &str = "after:";

/// Encode the keyset cursor resuming after `last_follower_id`.
pub fn encode_cursor(last_follower_id: &str) -> FollowerCursor {
    FollowerCursor::new(format!("{CURSOR_PREFIX}{last_follower_id}"))
}

/// Decode a cursor produced by [`encode_cursor`] back into the follower id it
/// resumes after.
///
/// # Example
///
/// ```
/// use story_fanout_repository::utils::{decode_cursor, encode_cursor};
///
/// let cursor = encode_cursor("follower-9");
/// assert_eq!(decode_cursor(&cursor).unwrap(), "follower-9");
/// ```
pub fn decode_cursor(cursor: &FollowerCursor) -> Result<&str, StoreError> {
    cursor
        .as_str()
        .strip_prefix(CURSOR_PREFIX)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::invalid_input(format!("Malformed follower cursor: {cursor}")))
}

/// Check a page size against the backend limits.
pub fn validate_page_size(page_size: usize, config: &StoreConfig) -> Result<(), StoreError> {
    if page_size == 0 {
        return Err(StoreError::invalid_input("Page size must be at least 1"));
    }
    if page_size > config.max_page_size {
        return Err(StoreError::invalid_input(format!(
            "Page size {} exceeds maximum of {}",
            page_size, config.max_page_size
        )));
    }
    Ok(())
}

/// Check an append batch against the backend limits.
pub fn validate_batch(
    entries: &[NotificationEntry],
    config: &StoreConfig,
) -> Result<(), StoreError> {
    if let Some(max) = config.max_batch_size {
        if entries.len() > max {
            return Err(StoreError::invalid_input(format!(
                "Batch size {} exceeds maximum of {}",
                entries.len(),
                max
            )));
        }
    }
    if entries.iter().any(|e| e.recipient_id.is_empty()) {
        return Err(StoreError::invalid_input("Entry with empty recipient_id"));
    }
    Ok(())
}
