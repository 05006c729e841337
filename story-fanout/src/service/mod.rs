//! Operations exposed to the request layer.
//!
//! [`FanoutService`] accepts publishes and follower updates, runs each fan-out
//! job as its own task, and tracks running jobs so they can be cancelled,
//! resumed, and drained on shutdown.

mod validation;

pub use validation::{validate_user_id, MAX_USER_ID_LEN};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use story_fanout_shared::{FanoutJob, JobId, JobStatus, Story, StoryId, UserId};
use tokio::sync::{watch, Mutex, Semaphore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::config::FanoutConfig;
use crate::errors::FanoutError;
use crate::orchestrator::{CancelReason, FanoutEngine, FanoutStores, MetricsSnapshot};
use crate::retry::RetryPolicy;

/// Jobs loaded per status when recovering after a restart.
const RECOVERY_BATCH_LIMIT: usize = 10_000;

/// Returned once a story and its fan-out job are durably stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub job_id: JobId,
    pub story_id: StoryId,
    pub sequence: i64,
}

struct Inner {
    stores: FanoutStores,
    engine: Arc<FanoutEngine>,
    permits: Arc<Semaphore>,
    /// Cancel handles of jobs with a live task in this process.
    running: Mutex<HashMap<JobId, watch::Sender<Option<CancelReason>>>>,
    /// Per author, the completion flag of the most recently scheduled job.
    lanes: Mutex<HashMap<UserId, watch::Receiver<bool>>>,
    /// Per author, serializes publishes so lanes follow sequence order.
    publish_locks: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
    active_tasks: watch::Sender<usize>,
    shutdown: watch::Sender<bool>,
}

/// Fan-out service handle. Cheap to clone.
///
/// Jobs of different authors run in parallel, up to `max_concurrent_jobs` at a
/// time. Jobs of one author start in publish order: each waits until the run
/// of the author's previous job has ended, so every recipient receives an
/// author's stories in sequence order.
#[derive(Clone)]
pub struct FanoutService {
    inner: Arc<Inner>,
}

impl FanoutService {
    /// Create a service running jobs on a new engine over `stores`.
    pub fn new(stores: FanoutStores, config: FanoutConfig) -> Result<Self, FanoutError> {
        config.validate()?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let engine = Arc::new(FanoutEngine::new(stores.clone(), config));
        let (active_tasks, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            inner: Arc::new(Inner {
                stores,
                engine,
                permits,
                running: Mutex::new(HashMap::new()),
                lanes: Mutex::new(HashMap::new()),
                publish_locks: Mutex::new(HashMap::new()),
                active_tasks,
                shutdown,
            }),
        })
    }

    fn config(&self) -> &FanoutConfig {
        self.inner.engine.config()
    }

    fn retry(&self) -> &RetryPolicy {
        &self.config().retry
    }

    fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.engine.metrics().snapshot()
    }

    /// Number of job tasks alive in this process, queued ones included.
    pub fn active_jobs(&self) -> usize {
        *self.inner.active_tasks.borrow()
    }

    /// Add followers to `author_id`.
    ///
    /// Followers are written in chunks of `batch_size`. Every chunk is
    /// idempotent and retried on transient failures.
    ///
    /// # Returns
    ///
    /// * `Ok(u64)` - Number of followers that were not following before
    /// * `Err(FanoutError::InvalidInput)` - A malformed id, or the author in their own list
    #[instrument(skip(self, follower_ids), fields(follower_count = follower_ids.len()))]
    pub async fn add_followers(
        &self,
        author_id: &str,
        follower_ids: &[UserId],
    ) -> Result<u64, FanoutError> {
        validate_user_id(author_id, "user_id")?;
        for follower_id in follower_ids {
            validate_user_id(follower_id, "follower_id")?;
            if follower_id == author_id {
                return Err(FanoutError::invalid_input(format!(
                    "User {author_id} cannot follow themselves"
                )));
            }
        }

        let mut added = 0;
        for chunk in follower_ids.chunks(self.config().batch_size) {
            added += self
                .retry()
                .run("add_followers", || {
                    self.inner.stores.followers.add_followers(author_id, chunk)
                })
                .await?;
        }

        info!(added, "Followers added");
        Ok(added)
    }

    pub async fn follower_count(&self, author_id: &str) -> Result<u64, FanoutError> {
        validate_user_id(author_id, "user_id")?;
        self.retry()
            .run("follower_count", || {
                self.inner.stores.followers.follower_count(author_id)
            })
            .await
    }

    /// Publish a story and schedule its fan-out.
    ///
    /// Returns once the story and its job are stored in one write. Delivery
    /// continues in the background and is observed through
    /// [`FanoutService::job_status`]. The publish itself is not retried, since
    /// a timed out write may still have created the story.
    #[instrument(skip(self, content))]
    pub async fn publish_story(
        &self,
        author_id: &str,
        content: &str,
    ) -> Result<PublishReceipt, FanoutError> {
        validate_user_id(author_id, "user_id")?;
        if self.is_shutting_down() {
            return Err(FanoutError::ShuttingDown);
        }

        let author_lock = self.publish_lock(author_id).await;
        let guard = author_lock.lock().await;
        let published = self.store_and_schedule(author_id, content).await;
        drop(guard);
        self.release_publish_lock(author_id, author_lock).await;

        let (story, job) = published?;
        info!(
            job_id = %job.id,
            story_id = %story.id,
            sequence = story.sequence,
            "Story published"
        );
        Ok(PublishReceipt {
            job_id: job.id,
            story_id: story.id,
            sequence: story.sequence,
        })
    }

    async fn store_and_schedule(
        &self,
        author_id: &str,
        content: &str,
    ) -> Result<(Story, FanoutJob), FanoutError> {
        let (story, job) = self
            .retry()
            .call_once(
                self.inner
                    .stores
                    .stories
                    .create_story_with_job(author_id, content),
            )
            .await?;
        self.spawn_job(job.id, story.author_id.clone()).await?;
        Ok((story, job))
    }

    async fn publish_lock(&self, author_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.publish_locks.lock().await;
        Arc::clone(locks.entry(author_id.to_string()).or_default())
    }

    async fn release_publish_lock(&self, author_id: &str, lock: Arc<Mutex<()>>) {
        let mut locks = self.inner.publish_locks.lock().await;
        drop(lock);
        // Only the map still holds it: no publish for this author is waiting.
        if locks
            .get(author_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(author_id);
        }
    }

    /// Current state of a job.
    pub async fn job_status(&self, job_id: JobId) -> Result<FanoutJob, FanoutError> {
        self.retry()
            .run("get_job", || self.inner.stores.jobs.get_job(&job_id))
            .await?
            .ok_or(FanoutError::JobNotFound(job_id))
    }

    /// Restart a job from its persisted cursor.
    ///
    /// # Returns
    ///
    /// * `Ok(FanoutJob)` - The job as it was before the restart
    /// * `Err(FanoutError::InvalidInput)` - The job is completed or already running
    /// * `Err(FanoutError::JobNotFound)` - No such job
    #[instrument(skip(self))]
    pub async fn resume_job(&self, job_id: JobId) -> Result<FanoutJob, FanoutError> {
        if self.is_shutting_down() {
            return Err(FanoutError::ShuttingDown);
        }
        let job = self.job_status(job_id).await?;
        if !job.status.is_resumable() {
            return Err(FanoutError::invalid_input(format!(
                "Job {job_id} is {} and cannot be resumed",
                job.status
            )));
        }

        self.spawn_job(job.id, job.author_id.clone()).await?;
        info!(cursor = ?job.cursor, delivered = job.delivered, "Job resumed");
        Ok(job)
    }

    /// Stop a job between batches, leaving it resumable at its cursor.
    ///
    /// A job that is not running in this process is marked failed directly.
    /// Cancelling a failed job is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel_job(&self, job_id: JobId) -> Result<(), FanoutError> {
        if let Some(cancel) = self.inner.running.lock().await.get(&job_id) {
            cancel.send_replace(Some(CancelReason::Requested));
            info!("Cancellation requested");
            return Ok(());
        }

        let job = self.job_status(job_id).await?;
        match job.status {
            JobStatus::Completed => Err(FanoutError::invalid_input(format!(
                "Job {job_id} is already completed"
            ))),
            JobStatus::Failed => Ok(()),
            JobStatus::Pending | JobStatus::InProgress => {
                self.retry()
                    .run("mark_failed", || {
                        self.inner
                            .stores
                            .jobs
                            .mark_failed(&job_id, CancelReason::Requested.as_str())
                    })
                    .await?;
                info!("Idle job cancelled");
                Ok(())
            }
        }
    }

    /// Reschedule the jobs left unfinished by a previous process.
    ///
    /// Picks up pending and in-progress jobs, and failed jobs that were
    /// interrupted by a shutdown. Jobs that failed for any other reason stay
    /// failed until resumed explicitly.
    ///
    /// # Returns
    ///
    /// * `Ok(usize)` - Number of jobs scheduled
    #[instrument(skip(self))]
    pub async fn resume_incomplete(&self) -> Result<usize, FanoutError> {
        let mut jobs = Vec::new();
        for status in [JobStatus::Pending, JobStatus::InProgress, JobStatus::Failed] {
            let listed = self
                .retry()
                .run("list_jobs", || {
                    self.inner.stores.jobs.list_jobs(status, RECOVERY_BATCH_LIMIT)
                })
                .await?;
            jobs.extend(listed.into_iter().filter(|job| {
                job.status != JobStatus::Failed
                    || job.last_error.as_deref() == Some(CancelReason::Shutdown.as_str())
            }));
        }

        // Lanes are per author and start in scheduling order.
        jobs.sort_by(|a, b| {
            a.author_id
                .cmp(&b.author_id)
                .then(a.story_sequence.cmp(&b.story_sequence))
        });

        let mut scheduled = 0;
        for job in jobs {
            match self.spawn_job(job.id, job.author_id.clone()).await {
                Ok(()) => scheduled += 1,
                Err(FanoutError::InvalidInput(_)) => {
                    debug!(job_id = %job.id, "Job already running, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        info!(scheduled, "Incomplete jobs rescheduled");
        Ok(scheduled)
    }

    /// Delete completed jobs last updated before `older_than`.
    pub async fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<u64, FanoutError> {
        let purged = self
            .retry()
            .run("purge_completed", || {
                self.inner.stores.jobs.purge_completed(older_than)
            })
            .await?;
        info!(purged, "Completed jobs purged");
        Ok(purged)
    }

    /// Stop accepting work, interrupt running jobs between batches and wait
    /// for their tasks to finish.
    ///
    /// Interrupted jobs are left failed at their cursor and picked up again by
    /// [`FanoutService::resume_incomplete`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        {
            let running = self.inner.running.lock().await;
            info!(running = running.len(), "Shutting down fan-out service");
            for cancel in running.values() {
                cancel.send_replace(Some(CancelReason::Shutdown));
            }
        }

        let mut active = self.inner.active_tasks.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;
        info!("Fan-out service stopped");
    }

    /// Log engine counters every `progress_interval` until shutdown.
    pub fn spawn_progress_reporter(&self) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut timer = interval(self.config().progress_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tokio::spawn(async move {
            let mut previous = service.metrics();
            let mut previous_at = Instant::now();

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let current = service.metrics();
                        let now = Instant::now();
                        let elapsed = now.duration_since(previous_at).as_secs_f64();
                        let entries_per_sec = if elapsed > 0.0 {
                            current.entries_appended.saturating_sub(previous.entries_appended) as f64
                                / elapsed
                        } else {
                            0.0
                        };

                        info!(
                            active_jobs = service.active_jobs(),
                            jobs_completed = current.jobs_completed,
                            jobs_failed = current.jobs_failed,
                            batches_delivered = current.batches_delivered,
                            entries_appended = current.entries_appended,
                            duplicates_skipped = current.duplicates_skipped,
                            entries_per_sec = format!("{:.2}", entries_per_sec),
                            "Fan-out progress"
                        );

                        previous = current;
                        previous_at = now;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Start a task running `job_id` in the author's lane.
    async fn spawn_job(&self, job_id: JobId, author_id: UserId) -> Result<(), FanoutError> {
        let (cancel_tx, cancel_rx) = watch::channel(None);
        {
            let mut running = self.inner.running.lock().await;
            if running.contains_key(&job_id) {
                return Err(FanoutError::invalid_input(format!(
                    "Job {job_id} is already running"
                )));
            }
            if self.is_shutting_down() {
                cancel_tx.send_replace(Some(CancelReason::Shutdown));
            }
            running.insert(job_id, cancel_tx);
        }

        let (done_tx, done_rx) = watch::channel(false);
        let previous = self
            .inner
            .lanes
            .lock()
            .await
            .insert(author_id.clone(), done_rx.clone());
        self.inner.active_tasks.send_modify(|count| *count += 1);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Some(mut previous) = previous {
                // An error means the previous task is gone, which also ends its turn.
                let _ = previous.wait_for(|done| *done).await;
            }

            let result = match Arc::clone(&inner.permits).acquire_owned().await {
                Ok(_permit) => inner.engine.run_job(job_id, cancel_rx).await,
                Err(_) => Err(FanoutError::ShuttingDown),
            };

            match &result {
                Ok(job) => debug!(job_id = %job_id, delivered = job.delivered, "Job task finished"),
                Err(FanoutError::Cancelled(_)) => debug!(job_id = %job_id, "Job task cancelled"),
                Err(FanoutError::InvalidInput(msg)) => {
                    warn!(job_id = %job_id, error = %msg, "Job could not start")
                }
                Err(e) => error!(job_id = %job_id, error = %e, "Job task failed"),
            }

            done_tx.send_replace(true);
            inner.running.lock().await.remove(&job_id);
            {
                let mut lanes = inner.lanes.lock().await;
                if lanes
                    .get(&author_id)
                    .is_some_and(|tail| tail.same_channel(&done_rx))
                {
                    lanes.remove(&author_id);
                }
            }
            inner.active_tasks.send_modify(|count| *count -= 1);
        });

        Ok(())
    }
}
