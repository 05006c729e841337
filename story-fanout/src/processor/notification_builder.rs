use story_fanout_shared::{NotificationEntry, Story, UserId};

/// Builds the notification entries delivering one story.
///
/// The payload is rendered once per story and shared by every entry.
pub struct NotificationBuilder {
    story: Story,
    payload: String,
}

impl NotificationBuilder {
    pub fn new(story: Story) -> Self {
        let payload = story.notification_payload();
        Self { story, payload }
    }

    /// One entry per follower, in page order.
    pub fn build_batch(&self, followers: &[UserId]) -> Vec<NotificationEntry> {
        followers
            .iter()
            .map(|follower| {
                NotificationEntry::for_story(&self.story, follower.clone(), self.payload.clone())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use story_fanout_shared::idempotency_key;

    #[test]
    fn test_build_batch_keys_each_follower() {
        let story = Story::new("42", "Story 1 content", 1);
        let builder = NotificationBuilder::new(story.clone());
        let followers: Vec<UserId> = vec!["1".into(), "2".into(), "3".into()];

        let batch = builder.build_batch(&followers);

        assert_eq!(batch.len(), 3);
        for (entry, follower) in batch.iter().zip(&followers) {
            assert_eq!(&entry.recipient_id, follower);
            assert_eq!(entry.idempotency_key, idempotency_key(&story.id, follower));
            assert_eq!(entry.payload, "New story from 42: Story 1 content");
            assert_eq!(entry.story_sequence, 1);
        }
    }

    #[test]
    fn test_rebuilding_yields_same_keys() {
        let builder = NotificationBuilder::new(Story::new("42", "x", 1));
        let followers: Vec<UserId> = vec!["7".into()];
        let first = builder.build_batch(&followers);
        let again = builder.build_batch(&followers);
        assert_eq!(first[0].idempotency_key, again[0].idempotency_key);
    }

    #[test]
    fn test_empty_page_builds_nothing() {
        let builder = NotificationBuilder::new(Story::new("42", "x", 1));
        assert!(builder.build_batch(&[]).is_empty());
    }
}
