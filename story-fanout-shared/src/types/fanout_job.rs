//! Fan-out job types.
//!
//! A fan-out job tracks the delivery of one story to the author's follower set.
//! The cursor marks the last follower page whose notifications are durably
//! appended, which is where a resumed job picks up.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::{FollowerCursor, Story, StoryId, UserId};

/// Unique identifier of a fan-out job.
pub type JobId = Uuid;

/// Lifecycle status of a fan-out job.
///
/// ```text
/// Pending -> InProgress -> Completed
///                 |  ^
///                 v  |
///               Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::InProgress,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    /// Statuses from which `next` can be reached.
    pub fn sources_of(next: JobStatus) -> impl Iterator<Item = JobStatus> {
        Self::ALL
            .into_iter()
            .filter(move |status| status.can_transition_to(next))
    }

    /// Returns the status as stored in the job table.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether the job can be (re)started from its cursor.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, JobStatus::Completed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Completed)
                | (JobStatus::InProgress, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::InProgress)
                // A job that never started can still be cancelled.
                | (JobStatus::Pending, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a stored status string is not recognised.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown job status: {0}")]
pub struct ParseJobStatusError(pub String);

impl std::str::FromStr for JobStatus {
    type Err = ParseJobStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(ParseJobStatusError(other.to_string())),
        }
    }
}

/// Durable record of one story's fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FanoutJob {
    pub id: JobId,
    pub story_id: StoryId,
    pub author_id: UserId,
    pub story_sequence: i64,
    /// Last durably processed page. `None` means start from the beginning.
    pub cursor: Option<FollowerCursor>,
    pub status: JobStatus,
    /// Followers covered by batches behind the cursor.
    pub delivered: u64,
    /// Number of runs started for this job (first run included).
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FanoutJob {
    /// Create a pending job for a freshly published story.
    pub fn for_story(story: &Story) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            story_id: story.id,
            author_id: story.author_id.clone(),
            story_sequence: story.sequence,
            cursor: None,
            status: JobStatus::Pending,
            delivered: 0,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}
