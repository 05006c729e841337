use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesOrdered, StreamExt};
use story_fanout_repository::{AppendSummary, StoreError};
use story_fanout_shared::{FanoutJob, FollowerCursor, JobId, JobStatus, NotificationEntry};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use super::metrics::EngineMetrics;
use super::FanoutStores;
use crate::config::FanoutConfig;
use crate::consumer::FollowerPager;
use crate::errors::FanoutError;
use crate::loader::NotificationLoader;
use crate::processor::NotificationBuilder;
use crate::retry::RetryPolicy;

/// Batches between two progress log lines of a job.
const PROGRESS_LOG_EVERY_BATCHES: u64 = 20;

/// Why a job was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// An operator cancelled the job.
    Requested,
    /// The service is shutting down. The job is resumed on the next start.
    Shutdown,
}

impl CancelReason {
    /// The `last_error` recorded on a job stopped for this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Requested => "cancelled",
            CancelReason::Shutdown => "interrupted by shutdown",
        }
    }
}

/// Why a run stopped before the follower set was exhausted.
enum Stop {
    Failed(FanoutError),
    Cancelled(CancelReason),
}

/// Durable state reached by a run.
struct Progress {
    cursor: Option<FollowerCursor>,
    delivered: u64,
    batches: u64,
    stop: Option<Stop>,
}

impl Progress {
    fn has_failed(&self) -> bool {
        matches!(self.stop, Some(Stop::Failed(_)))
    }

    fn fail(&mut self, err: FanoutError) {
        if !self.has_failed() {
            self.stop = Some(Stop::Failed(err));
        }
    }
}

/// Result of one append call, tagged with the cursor it allows to persist.
struct BatchOutcome {
    result: Result<AppendSummary, FanoutError>,
    cursor: Option<FollowerCursor>,
    followers: u64,
}

/// Delivers published stories to every follower of their author.
///
/// One call to [`FanoutEngine::run_job`] drives a job from its persisted
/// cursor until the follower set is exhausted, a batch runs out of retries,
/// or the job is cancelled. Pages are read in sequence while up to
/// `workers_per_job` appends run concurrently. Appends complete in page order,
/// so the persisted cursor never skips an undelivered batch.
pub struct FanoutEngine {
    stores: FanoutStores,
    pager: FollowerPager,
    loader: NotificationLoader,
    config: FanoutConfig,
    metrics: Arc<EngineMetrics>,
}

impl FanoutEngine {
    /// Create a new engine over `stores`.
    pub fn new(stores: FanoutStores, config: FanoutConfig) -> Self {
        let pager = FollowerPager::new(
            stores.followers.clone(),
            config.retry.clone(),
            config.batch_size,
        );
        let loader = NotificationLoader::new(stores.queue.clone(), config.retry.clone())
            .with_inbox_max_len(config.inbox_max_len);

        Self {
            stores,
            pager,
            loader,
            config,
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    pub fn config(&self) -> &FanoutConfig {
        &self.config
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    fn retry(&self) -> &RetryPolicy {
        &self.config.retry
    }

    /// Run a job from its persisted cursor.
    ///
    /// `cancel` is checked between batches; appends already in flight finish
    /// first, and their progress is persisted.
    ///
    /// # Returns
    ///
    /// * `Ok(FanoutJob)` - The job, now `Completed`
    /// * `Err(FanoutError::Cancelled)` - The job was stopped and left `Failed` at its cursor
    /// * `Err(FanoutError::InvalidInput)` - The job is already completed
    /// * `Err(FanoutError::JobNotFound)` - No such job
    /// * `Err(FanoutError)` - Delivery failed; the job is left `Failed` at its cursor
    #[instrument(skip(self, cancel), fields(job_id = %job_id))]
    pub async fn run_job(
        &self,
        job_id: JobId,
        cancel: watch::Receiver<Option<CancelReason>>,
    ) -> Result<FanoutJob, FanoutError> {
        let cancelled_before_start = *cancel.borrow();
        if let Some(reason) = cancelled_before_start {
            return self.abandon(job_id, reason).await;
        }

        let mut job = self
            .retry()
            .run("begin_run", || self.stores.jobs.begin_run(&job_id))
            .await
            .map_err(|e| match e {
                FanoutError::Store(StoreError::NotFound(_)) => FanoutError::JobNotFound(job_id),
                other => other,
            })?;
        self.metrics.job_started();

        info!(
            story_id = %job.story_id,
            author_id = %job.author_id,
            story_sequence = job.story_sequence,
            attempt = job.attempts,
            resumed = job.cursor.is_some(),
            "Starting fan-out"
        );

        let story = match self
            .retry()
            .run("get_story", || self.stores.stories.get_story(&job.story_id))
            .await
        {
            Ok(Some(story)) => story,
            Ok(None) => {
                let err = FanoutError::Store(StoreError::not_found(format!(
                    "Story {}",
                    job.story_id
                )));
                return Err(self.record_failure(&job, err).await);
            }
            Err(e) => return Err(self.record_failure(&job, e).await),
        };
        let builder = NotificationBuilder::new(story);

        let progress = self.deliver(&job, &builder, &cancel).await;
        job.cursor = progress.cursor;
        job.delivered = progress.delivered;

        match progress.stop {
            None => {
                let completed = self
                    .retry()
                    .run("mark_completed", || {
                        self.stores.jobs.mark_completed(&job.id, job.delivered)
                    })
                    .await;
                if let Err(e) = completed {
                    return Err(self.record_failure(&job, e).await);
                }
                self.metrics.job_completed();
                info!(
                    delivered = job.delivered,
                    batches = progress.batches,
                    "Fan-out completed"
                );
                job.status = JobStatus::Completed;
                job.updated_at = Utc::now();
                Ok(job)
            }
            Some(Stop::Failed(err)) => Err(self.record_failure(&job, err).await),
            Some(Stop::Cancelled(reason)) => {
                self.retry()
                    .run("mark_failed", || {
                        self.stores.jobs.mark_failed(&job.id, reason.as_str())
                    })
                    .await?;
                self.metrics.job_failed();
                warn!(
                    delivered = job.delivered,
                    reason = reason.as_str(),
                    "Fan-out stopped between batches"
                );
                Err(FanoutError::Cancelled(job.id))
            }
        }
    }

    /// Page through the follower set and deliver every batch after the
    /// job's cursor.
    ///
    /// Appends already in flight keep running while the next page is read.
    async fn deliver(
        &self,
        job: &FanoutJob,
        builder: &NotificationBuilder,
        cancel: &watch::Receiver<Option<CancelReason>>,
    ) -> Progress {
        let workers = self.config.workers_per_job.max(1);
        let mut progress = Progress {
            cursor: job.cursor.clone(),
            delivered: job.delivered,
            batches: 0,
            stop: None,
        };
        let mut fetch_cursor = job.cursor.clone();
        let mut exhausted = false;
        let mut in_flight = FuturesOrdered::new();

        loop {
            if !exhausted && progress.stop.is_none() && in_flight.len() < workers {
                let requested = *cancel.borrow();
                if let Some(reason) = requested {
                    progress.stop = Some(Stop::Cancelled(reason));
                    continue;
                }

                let fetched = {
                    let fetch = self.pager.next_page(&job.author_id, fetch_cursor.as_ref());
                    tokio::pin!(fetch);
                    loop {
                        tokio::select! {
                            fetched = &mut fetch => break fetched,
                            Some(outcome) = in_flight.next() => {
                                self.settle(job, &mut progress, outcome).await;
                            }
                        }
                    }
                };

                let page = match fetched {
                    Ok(page) => page,
                    Err(e) => {
                        progress.fail(e);
                        continue;
                    }
                };

                exhausted = page.done || page.is_empty();
                fetch_cursor = page.next_cursor.clone();
                if page.is_empty() || progress.has_failed() {
                    continue;
                }

                let entries = builder.build_batch(&page.followers);
                in_flight.push_back(self.append(entries, page.next_cursor));
                continue;
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };
            self.settle(job, &mut progress, outcome).await;
        }

        progress
    }

    /// Persist the cursor of a finished append, in page order.
    async fn settle(&self, job: &FanoutJob, progress: &mut Progress, outcome: BatchOutcome) {
        match outcome.result {
            // A batch before this one failed, so the cursor cannot move past it.
            Ok(_) if progress.has_failed() => {}
            Ok(summary) => {
                let delivered = progress.delivered + outcome.followers;
                let saved = self
                    .retry()
                    .run("save_progress", || {
                        self.stores
                            .jobs
                            .save_progress(&job.id, outcome.cursor.as_ref(), delivered)
                    })
                    .await;

                match saved {
                    Ok(()) => {
                        progress.cursor = outcome.cursor;
                        progress.delivered = delivered;
                        progress.batches += 1;
                        self.metrics
                            .batch_delivered(summary.appended, summary.duplicates);

                        debug!(
                            appended = summary.appended,
                            duplicates = summary.duplicates,
                            delivered,
                            "Batch delivered"
                        );
                        if progress.batches % PROGRESS_LOG_EVERY_BATCHES == 0 {
                            info!(
                                batches = progress.batches,
                                delivered, "Fan-out progress"
                            );
                        }
                    }
                    Err(e) => progress.fail(e),
                }
            }
            Err(e) => progress.fail(e),
        }
    }

    async fn append(
        &self,
        entries: Vec<NotificationEntry>,
        cursor: Option<FollowerCursor>,
    ) -> BatchOutcome {
        let followers = entries.len() as u64;
        BatchOutcome {
            result: self.loader.load(&entries).await,
            cursor,
            followers,
        }
    }

    /// Persist a failed run and hand the error back.
    async fn record_failure(&self, job: &FanoutJob, err: FanoutError) -> FanoutError {
        self.metrics.job_failed();
        error!(
            delivered = job.delivered,
            cursor = ?job.cursor,
            error = %err,
            "Fan-out failed, job left resumable at its cursor"
        );

        let message = err.to_string();
        if let Err(e) = self
            .retry()
            .run("mark_failed", || self.stores.jobs.mark_failed(&job.id, &message))
            .await
        {
            error!(error = %e, "Failed to record job failure");
        }
        err
    }

    /// Stop a job that was cancelled before its run began.
    async fn abandon(
        &self,
        job_id: JobId,
        reason: CancelReason,
    ) -> Result<FanoutJob, FanoutError> {
        let job = self
            .retry()
            .run("get_job", || self.stores.jobs.get_job(&job_id))
            .await?
            .ok_or(FanoutError::JobNotFound(job_id))?;

        if job.status.can_transition_to(JobStatus::Failed) {
            self.retry()
                .run("mark_failed", || {
                    self.stores.jobs.mark_failed(&job_id, reason.as_str())
                })
                .await?;
        }
        debug!(reason = reason.as_str(), "Job cancelled before it started");
        Err(FanoutError::Cancelled(job_id))
    }
}
