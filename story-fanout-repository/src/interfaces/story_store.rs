//! Story store trait definition.

use async_trait::async_trait;
use story_fanout_shared::{FanoutJob, Story, StoryId};

use crate::errors::StoreError;

/// Durable record of published stories.
#[async_trait]
pub trait StoryStore: Send + Sync {
    /// Persist a new story for `author_id`, assigning the next sequence number.
    ///
    /// Sequences start at 1 and increase by one per author, also under
    /// concurrent publishes.
    async fn create_story(&self, author_id: &str, content: &str) -> Result<Story, StoreError>;

    /// Persist a new story together with its pending fan-out job.
    ///
    /// Both are written or neither is, so a failed call never consumes a
    /// sequence number without leaving a job to deliver it.
    ///
    /// # Returns
    ///
    /// * `Ok((Story, FanoutJob))` - The stored story and its `Pending` job
    /// * `Err(StoreError::InvalidInput)` - If `author_id` is empty
    async fn create_story_with_job(
        &self,
        author_id: &str,
        content: &str,
    ) -> Result<(Story, FanoutJob), StoreError>;

    /// Look up a story by id.
    async fn get_story(&self, story_id: &StoryId) -> Result<Option<Story>, StoreError>;
}
