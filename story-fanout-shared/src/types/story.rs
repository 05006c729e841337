//! Story types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserId;

/// Unique identifier of a published story.
pub type StoryId = Uuid;

/// A story published by an author.
///
/// `sequence` is assigned per author at publish time, starting at 1 and
/// strictly increasing. Notifications are ordered by it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    pub id: StoryId,
    pub author_id: UserId,
    pub content: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
}

impl Story {
    /// Create a story with a fresh id, stamped with the current time.
    pub fn new(author_id: impl Into<UserId>, content: impl Into<String>, sequence: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            author_id: author_id.into(),
            content: content.into(),
            sequence,
            created_at: Utc::now(),
        }
    }

    /// The text delivered to every follower's inbox.
    pub fn notification_payload(&self) -> String {
        format!("New story from {}: {}", self.author_id, self.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_payload() {
        let story = Story::new("42", "Story 1 content", 1);
        assert_eq!(
            story.notification_payload(),
            "New story from 42: Story 1 content"
        );
    }

    #[test]
    fn test_new_assigns_distinct_ids() {
        let a = Story::new("42", "a", 1);
        let b = Story::new("42", "a", 1);
        assert_ne!(a.id, b.id);
    }
}
