//! Test doubles and helpers shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use story_fanout::config::FanoutConfig;
use story_fanout::orchestrator::FanoutStores;
use story_fanout::retry::RetryPolicy;
use story_fanout::FanoutService;
use story_fanout_repository::{
    AppendSummary, FanoutJobStore, FollowerGraphStore, MemoryStore, NotificationQueueStore,
    StoreError, StoryStore,
};
use story_fanout_shared::{
    FanoutJob, FollowerCursor, FollowerPage, JobId, JobStatus, NotificationEntry, Story, StoryId,
    UserId,
};

/// Retry policy with millisecond backoff so failure tests run fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        call_timeout: Duration::from_secs(2),
    }
}

pub fn test_config(batch_size: usize, workers_per_job: usize) -> FanoutConfig {
    FanoutConfig {
        batch_size,
        workers_per_job,
        max_concurrent_jobs: 8,
        retry: fast_retry(),
        inbox_max_len: None,
        progress_interval: Duration::from_secs(60),
    }
}

pub fn follower_ids(count: usize) -> Vec<UserId> {
    (1..=count).map(|i| format!("follower-{i:05}")).collect()
}

/// Store a story and its pending job, the way a publish does.
pub async fn seed_job(store: &MemoryStore, author_id: &str, content: &str) -> FanoutJob {
    let story = store.create_story(author_id, content).await.unwrap();
    let job = FanoutJob::for_story(&story);
    store.create_job(&job).await.unwrap();
    job
}

/// Poll until the job reaches `status` or the deadline passes.
pub async fn wait_for_status(service: &FanoutService, job_id: JobId, status: JobStatus) -> FanoutJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let job = service.job_status(job_id).await.unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {} (wanted {status})",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until the job has delivered at least one batch.
pub async fn wait_for_progress(service: &FanoutService, job_id: JobId) -> FanoutJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let job = service.job_status(job_id).await.unwrap();
        if job.delivered > 0 {
            return job;
        }
        assert!(tokio::time::Instant::now() < deadline, "job {job_id} made no progress");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Notification queue wrapper that injects failures in front of a memory store.
pub struct FlakyQueue {
    inner: Arc<MemoryStore>,
    /// Appends rejected before reaching the store.
    transient_failures: AtomicUsize,
    /// Appends applied to the store whose acknowledgement is then lost.
    lost_acks: AtomicUsize,
    /// Successful appends after which the store goes down for good.
    fail_after: Option<usize>,
    /// Pause before every append.
    delay: Duration,
    /// Batches holding this recipient are always rejected.
    poisoned_recipient: Option<UserId>,
    successes: AtomicUsize,
    pub append_calls: AtomicUsize,
}

impl FlakyQueue {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            transient_failures: AtomicUsize::new(0),
            lost_acks: AtomicUsize::new(0),
            fail_after: None,
            delay: Duration::ZERO,
            poisoned_recipient: None,
            successes: AtomicUsize::new(0),
            append_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_lost_acks(self, count: usize) -> Self {
        self.lost_acks.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_after(mut self, successful_appends: usize) -> Self {
        self.fail_after = Some(successful_appends);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rejecting_recipient(mut self, recipient_id: &str) -> Self {
        self.poisoned_recipient = Some(recipient_id.to_string());
        self
    }

    /// Take one unit from `counter` if any is left.
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NotificationQueueStore for FlakyQueue {
    async fn append_batch(&self, entries: &[NotificationEntry]) -> Result<AppendSummary, StoreError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(limit) = self.fail_after {
            if self.successes.load(Ordering::SeqCst) >= limit {
                return Err(StoreError::unavailable("store is down"));
            }
        }
        if let Some(poisoned) = &self.poisoned_recipient {
            if entries.iter().any(|e| &e.recipient_id == poisoned) {
                return Err(StoreError::unavailable("shard unavailable"));
            }
        }
        if Self::take(&self.transient_failures) {
            return Err(StoreError::unavailable("connection reset"));
        }

        let summary = self.inner.append_batch(entries).await?;
        self.successes.fetch_add(1, Ordering::SeqCst);
        if Self::take(&self.lost_acks) {
            return Err(StoreError::Timeout(5000));
        }
        Ok(summary)
    }

    async fn trim(&self, recipient_id: &str, max_len: usize) -> Result<u64, StoreError> {
        self.inner.trim(recipient_id, max_len).await
    }

    async fn recent(&self, recipient_id: &str, limit: usize) -> Result<Vec<NotificationEntry>, StoreError> {
        self.inner.recent(recipient_id, limit).await
    }

    async fn count_for_story(&self, story_id: &StoryId) -> Result<u64, StoreError> {
        self.inner.count_for_story(story_id).await
    }
}

/// Stores backed by `store`, with the notification queue replaced by `queue`.
pub fn stores_with_queue(store: Arc<MemoryStore>, queue: Arc<FlakyQueue>) -> FanoutStores {
    FanoutStores {
        queue,
        ..FanoutStores::from_backend(store)
    }
}

/// Follower graph wrapper that injects page read failures in front of a memory store.
pub struct FlakyFollowers {
    inner: Arc<MemoryStore>,
    /// Page reads rejected before reaching the store.
    transient_failures: AtomicUsize,
    /// Successful page reads after which the store goes down for good.
    fail_after: Option<usize>,
    /// Pause before every page read.
    delay: Duration,
    /// Queue whose started appends are sampled when each page read returns.
    watched: Option<Arc<FlakyQueue>>,
    successes: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub appends_started_at_read: Mutex<Vec<usize>>,
}

impl FlakyFollowers {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            transient_failures: AtomicUsize::new(0),
            fail_after: None,
            delay: Duration::ZERO,
            watched: None,
            successes: AtomicUsize::new(0),
            page_calls: AtomicUsize::new(0),
            appends_started_at_read: Mutex::new(Vec::new()),
        }
    }

    pub fn with_transient_failures(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_after(mut self, successful_pages: usize) -> Self {
        self.fail_after = Some(successful_pages);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn watching(mut self, queue: Arc<FlakyQueue>) -> Self {
        self.watched = Some(queue);
        self
    }
}

#[async_trait]
impl FollowerGraphStore for FlakyFollowers {
    async fn add_followers(&self, author_id: &str, follower_ids: &[UserId]) -> Result<u64, StoreError> {
        self.inner.add_followers(author_id, follower_ids).await
    }

    async fn iterate_followers(
        &self,
        author_id: &str,
        cursor: Option<&FollowerCursor>,
        page_size: usize,
    ) -> Result<FollowerPage, StoreError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(queue) = &self.watched {
            let started = queue.append_calls.load(Ordering::SeqCst);
            self.appends_started_at_read.lock().unwrap().push(started);
        }
        if let Some(limit) = self.fail_after {
            if self.successes.load(Ordering::SeqCst) >= limit {
                return Err(StoreError::unavailable("replica is down"));
            }
        }
        if FlakyQueue::take(&self.transient_failures) {
            return Err(StoreError::unavailable("connection reset"));
        }

        let page = self.inner.iterate_followers(author_id, cursor, page_size).await?;
        self.successes.fetch_add(1, Ordering::SeqCst);
        Ok(page)
    }

    async fn follower_count(&self, author_id: &str) -> Result<u64, StoreError> {
        self.inner.follower_count(author_id).await
    }
}

/// Job store whose completion write never goes through.
pub struct StuckCompletion {
    inner: Arc<MemoryStore>,
}

impl StuckCompletion {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FanoutJobStore for StuckCompletion {
    async fn create_job(&self, job: &FanoutJob) -> Result<(), StoreError> {
        self.inner.create_job(job).await
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<FanoutJob>, StoreError> {
        self.inner.get_job(job_id).await
    }

    async fn begin_run(&self, job_id: &JobId) -> Result<FanoutJob, StoreError> {
        self.inner.begin_run(job_id).await
    }

    async fn save_progress(
        &self,
        job_id: &JobId,
        cursor: Option<&FollowerCursor>,
        delivered: u64,
    ) -> Result<(), StoreError> {
        self.inner.save_progress(job_id, cursor, delivered).await
    }

    async fn mark_completed(&self, _job_id: &JobId, _delivered: u64) -> Result<(), StoreError> {
        Err(StoreError::unavailable("primary is failing over"))
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> Result<(), StoreError> {
        self.inner.mark_failed(job_id, error).await
    }

    async fn list_jobs(&self, status: JobStatus, limit: usize) -> Result<Vec<FanoutJob>, StoreError> {
        self.inner.list_jobs(status, limit).await
    }

    async fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        self.inner.purge_completed(older_than).await
    }
}

/// Stores backed by `store`, with the follower graph replaced by `followers`.
pub fn stores_with_followers(store: Arc<MemoryStore>, followers: Arc<FlakyFollowers>) -> FanoutStores {
    FanoutStores {
        followers,
        ..FanoutStores::from_backend(store)
    }
}

/// Stores backed by `store`, with the job store replaced by `jobs`.
pub fn stores_with_jobs(store: Arc<MemoryStore>, jobs: Arc<StuckCompletion>) -> FanoutStores {
    FanoutStores {
        jobs,
        ..FanoutStores::from_backend(store)
    }
}

/// Story store that cannot be written to.
pub struct UnwritableStories {
    inner: Arc<MemoryStore>,
}

impl UnwritableStories {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl StoryStore for UnwritableStories {
    async fn create_story(&self, _author_id: &str, _content: &str) -> Result<Story, StoreError> {
        Err(StoreError::unavailable("read-only replica"))
    }

    async fn create_story_with_job(
        &self,
        _author_id: &str,
        _content: &str,
    ) -> Result<(Story, FanoutJob), StoreError> {
        Err(StoreError::unavailable("read-only replica"))
    }

    async fn get_story(&self, story_id: &StoryId) -> Result<Option<Story>, StoreError> {
        self.inner.get_story(story_id).await
    }
}
