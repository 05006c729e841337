//! # Story Fan-out Shared
//!
//! This crate defines shared data structures and types used across the story fan-out
//! system. It includes the definitions for stories, notification entries, fan-out jobs
//! and the follower pagination types exchanged with the follower graph.

pub mod types;

pub use types::{
    idempotency_key, FanoutJob, FollowerCursor, FollowerPage, JobId, JobStatus,
    NotificationEntry, ParseJobStatusError, Story, StoryId, UserId,
};
