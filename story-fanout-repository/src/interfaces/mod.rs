//! Interface definitions for the fan-out stores.
//!
//! This module defines the abstract store traits the fan-out engine depends on,
//! allowing dependency injection and swappable backends (PostgreSQL, in-memory).

mod fanout_job_store;
mod follower_graph_store;
mod notification_queue_store;
mod story_store;

pub use fanout_job_store::FanoutJobStore;
pub use follower_graph_store::FollowerGraphStore;
pub use notification_queue_store::NotificationQueueStore;
pub use story_store::StoryStore;
