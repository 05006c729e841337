//! Follower graph store trait definition.

use async_trait::async_trait;
use story_fanout_shared::{FollowerCursor, FollowerPage, UserId};

use crate::errors::StoreError;

/// Durable mapping from an author to the set of their followers.
///
/// Membership is a set: inserting an existing follower is a no-op, and the
/// order of insertion has no effect on enumeration.
///
/// Enumeration is paginated. Iteration order is stable for a given cursor, so
/// a page can be re-read after a crash and yields the same followers (plus any
/// followers added since, if they sort after the cursor).
#[async_trait]
pub trait FollowerGraphStore: Send + Sync {
    /// Insert `follower_ids` into the follower set of `author_id`.
    ///
    /// Each insertion is idempotent, so a failed call may be retried as a whole.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of followers that were not already present
    /// * `Err(StoreError::Unavailable)` - If the store cannot be reached
    async fn add_followers(
        &self,
        author_id: &str,
        follower_ids: &[UserId],
    ) -> Result<u64, StoreError>;

    /// Read the page of followers following `cursor`.
    ///
    /// `cursor = None` starts from the beginning. At most `page_size` followers
    /// are returned. `done` is set on the last page.
    ///
    /// # Returns
    ///
    /// * `Ok(FollowerPage)` - The page and the cursor to resume after it
    /// * `Err(StoreError::InvalidInput)` - If the cursor was not produced by this store
    /// * `Err(StoreError::Unavailable)` - If the store cannot be reached
    async fn iterate_followers(
        &self,
        author_id: &str,
        cursor: Option<&FollowerCursor>,
        page_size: usize,
    ) -> Result<FollowerPage, StoreError>;

    /// Number of followers of `author_id`.
    async fn follower_count(&self, author_id: &str) -> Result<u64, StoreError>;
}
