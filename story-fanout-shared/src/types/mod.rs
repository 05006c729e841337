//! This module defines the core data structures used across the fan-out system.
//! It re-exports the story, notification, job and follower page types.

pub mod fanout_job;
pub mod follower_page;
pub mod notification_entry;
pub mod story;

pub use fanout_job::{FanoutJob, JobId, JobStatus, ParseJobStatusError};
pub use follower_page::{FollowerCursor, FollowerPage};
pub use notification_entry::{idempotency_key, NotificationEntry};
pub use story::{Story, StoryId};

/// Opaque user identifier. Authors, followers and recipients are all users.
pub type UserId = String;
