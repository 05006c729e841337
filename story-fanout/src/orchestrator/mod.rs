//! Orchestrator module for story fan-out.
//!
//! Coordinates the pager, builder and loader to drive one fan-out job to
//! completion, persisting the job cursor after every delivered batch.

mod engine;
mod metrics;

pub use engine::{CancelReason, FanoutEngine};
pub use metrics::{EngineMetrics, MetricsSnapshot};

use std::sync::Arc;

use story_fanout_repository::{
    FanoutJobStore, FollowerGraphStore, NotificationQueueStore, StoryStore,
};

/// The stores a fan-out deployment runs against.
#[derive(Clone)]
pub struct FanoutStores {
    pub followers: Arc<dyn FollowerGraphStore>,
    pub queue: Arc<dyn NotificationQueueStore>,
    pub stories: Arc<dyn StoryStore>,
    pub jobs: Arc<dyn FanoutJobStore>,
}

impl FanoutStores {
    /// Use one backend for every store.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: FollowerGraphStore + NotificationQueueStore + StoryStore + FanoutJobStore + 'static,
    {
        Self {
            followers: backend.clone(),
            queue: backend.clone(),
            stories: backend.clone(),
            jobs: backend,
        }
    }
}
