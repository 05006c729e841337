//! Fan-out job store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use story_fanout_shared::{FanoutJob, FollowerCursor, JobId, JobStatus};

use crate::errors::StoreError;

/// Durable state of fan-out jobs.
///
/// The cursor saved through [`FanoutJobStore::save_progress`] is the
/// resumability contract of the engine: a restarted job continues from it.
#[async_trait]
pub trait FanoutJobStore: Send + Sync {
    /// Persist a newly created job.
    async fn create_job(&self, job: &FanoutJob) -> Result<(), StoreError>;

    /// Look up a job by id.
    async fn get_job(&self, job_id: &JobId) -> Result<Option<FanoutJob>, StoreError>;

    /// Move a job to `InProgress` and count a new run.
    ///
    /// Clears the last error and keeps the cursor.
    ///
    /// # Returns
    ///
    /// * `Ok(FanoutJob)` - The job as stored after the transition
    /// * `Err(StoreError::NotFound)` - If the job does not exist
    /// * `Err(StoreError::Conflict)` - If the job is already completed
    async fn begin_run(&self, job_id: &JobId) -> Result<FanoutJob, StoreError>;

    /// Durably advance the cursor of an in-progress job.
    async fn save_progress(
        &self,
        job_id: &JobId,
        cursor: Option<&FollowerCursor>,
        delivered: u64,
    ) -> Result<(), StoreError>;

    /// Mark a job completed.
    async fn mark_completed(&self, job_id: &JobId, delivered: u64) -> Result<(), StoreError>;

    /// Mark a job failed, keeping its cursor for a later resume.
    async fn mark_failed(&self, job_id: &JobId, error: &str) -> Result<(), StoreError>;

    /// Jobs in `status`, oldest first.
    async fn list_jobs(&self, status: JobStatus, limit: usize)
        -> Result<Vec<FanoutJob>, StoreError>;

    /// Delete completed jobs last updated before `older_than`.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of jobs removed
    async fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError>;
}
