//! Notification queue store trait definition.

use async_trait::async_trait;
use story_fanout_shared::{NotificationEntry, StoryId};

use crate::errors::StoreError;
use crate::types::AppendSummary;

/// Durable per-recipient log of notification entries.
///
/// Entries are keyed by their idempotency key. Appending an entry whose key is
/// already stored is a no-op, which makes whole-batch retries safe.
///
/// Log order is append order, except that each author's entries are kept in
/// ascending story sequence across the positions that author holds. A story
/// delivered late by a resumed job therefore never counts as newer than a
/// later story of the same author.
#[async_trait]
pub trait NotificationQueueStore: Send + Sync {
    /// Append a batch of entries, skipping keys that already exist.
    ///
    /// A call applies all of the batch or none of it.
    ///
    /// # Returns
    ///
    /// * `Ok(AppendSummary)` - How many entries were new and how many were duplicates
    /// * `Err(StoreError::Unavailable)` - On transient connectivity loss; retry the batch
    async fn append_batch(&self, entries: &[NotificationEntry])
        -> Result<AppendSummary, StoreError>;

    /// Keep only the newest `max_len` entries of `recipient_id`, in log order.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of entries removed
    async fn trim(&self, recipient_id: &str, max_len: usize) -> Result<u64, StoreError>;

    /// The newest `limit` entries of `recipient_id` in log order, oldest first.
    async fn recent(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationEntry>, StoreError>;

    /// Number of deliveries recorded for `story_id` across all recipients.
    ///
    /// Entries removed by [`NotificationQueueStore::trim`] still count, and
    /// their keys stay known so a retried batch does not deliver them again.
    async fn count_for_story(&self, story_id: &StoryId) -> Result<u64, StoreError>;
}
