//! Notification entry types.
//!
//! A notification entry is the unit written into a recipient's inbox. Its
//! idempotency key is derived from the story and the recipient, so any number
//! of retried appends for the same pair collapse into one logical delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Story, StoryId, UserId};

/// Namespace for name-based idempotency keys. Changing it re-keys every entry.
const IDEMPOTENCY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b3d_4c57_a8e2_0d71_53f9_c4b6);

/// Separator between the story id and the recipient id in the hashed name.
/// The unit separator cannot appear in a validated user id.
const KEY_SEPARATOR: u8 = 0x1f;

/// Derive the idempotency key for a `(story, recipient)` pair.
///
/// The key is a UUIDv5 (SHA-1, name-based) so it is stable across processes
/// and restarts.
///
/// # Example
///
/// ```
/// use story_fanout_shared::idempotency_key;
/// use uuid::Uuid;
///
/// let story_id = Uuid::new_v4();
/// assert_eq!(idempotency_key(&story_id, "7"), idempotency_key(&story_id, "7"));
/// assert_ne!(idempotency_key(&story_id, "7"), idempotency_key(&story_id, "8"));
/// ```
pub fn idempotency_key(story_id: &StoryId, recipient_id: &str) -> Uuid {
    let mut name = Vec::with_capacity(16 + 1 + recipient_id.len());
    name.extend_from_slice(story_id.as_bytes());
    name.push(KEY_SEPARATOR);
    name.extend_from_slice(recipient_id.as_bytes());
    Uuid::new_v5(&IDEMPOTENCY_NAMESPACE, &name)
}

/// A single inbox entry for one recipient about one story.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NotificationEntry {
    pub idempotency_key: Uuid,
    pub recipient_id: UserId,
    pub author_id: UserId,
    pub story_id: StoryId,
    pub story_sequence: i64,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationEntry {
    /// Build the entry delivering `story` to `recipient_id`.
    pub fn for_story(story: &Story, recipient_id: impl Into<UserId>, payload: String) -> Self {
        let recipient_id = recipient_id.into();
        Self {
            idempotency_key: idempotency_key(&story.id, &recipient_id),
            recipient_id,
            author_id: story.author_id.clone(),
            story_id: story.id,
            story_sequence: story.sequence,
            payload,
            created_at: Utc::now(),
        }
    }
}
