use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use story_fanout_shared::{
    FanoutJob, FollowerCursor, FollowerPage, JobId, JobStatus, NotificationEntry, Story, StoryId,
    UserId,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::errors::StoreError;
use crate::interfaces::{FanoutJobStore, FollowerGraphStore, NotificationQueueStore, StoryStore};
use crate::types::AppendSummary;
use crate::utils::{decode_cursor, encode_cursor, validate_batch, validate_page_size};

#[derive(Default)]
struct StoryState {
    stories: HashMap<StoryId, Story>,
    sequences: HashMap<UserId, i64>,
}

#[derive(Default)]
struct QueueState {
    /// Every key ever appended, mapped to its story. Survives trimming.
    keys: HashMap<Uuid, StoryId>,
    deliveries: HashMap<StoryId, u64>,
    logs: HashMap<UserId, VecDeque<NotificationEntry>>,
}

/// In-memory implementation of all fan-out stores.
///
/// Each collection sits behind its own lock, so a batch append never waits on
/// a follower page read. Share it between components through an `Arc`.
pub struct MemoryStore {
    config: StoreConfig,
    followers: RwLock<HashMap<UserId, BTreeSet<UserId>>>,
    stories: RwLock<StoryState>,
    queue: RwLock<QueueState>,
    jobs: RwLock<HashMap<JobId, FanoutJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            config,
            followers: RwLock::new(HashMap::new()),
            stories: RwLock::new(StoryState::default()),
            queue: RwLock::new(QueueState::default()),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Total number of entries currently held across all recipient logs.
    pub async fn stored_entries(&self) -> usize {
        self.queue.read().await.logs.values().map(VecDeque::len).sum()
    }
}

/// Append `entry` to a recipient log that is ordered by sequence within each
/// author, keeping it that way.
///
/// A late entry takes the slot of the first newer entry of its author, and
/// those newer entries each move one slot of their author down the log.
fn push_in_sequence(log: &mut VecDeque<NotificationEntry>, entry: NotificationEntry) {
    let last = log.len();
    let newer: Vec<usize> = log
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            e.author_id == entry.author_id && e.story_sequence > entry.story_sequence
        })
        .map(|(position, _)| position)
        .collect();

    log.push_back(entry);
    for position in newer {
        log.swap(position, last);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn next_story(state: &mut StoryState, author_id: &str, content: &str) -> Result<Story, StoreError> {
    if author_id.is_empty() {
        return Err(StoreError::invalid_input("Author id must not be empty"));
    }

    let sequence = state.sequences.entry(author_id.to_string()).or_insert(0);
    *sequence += 1;
    let story = Story::new(author_id, content, *sequence);
    state.stories.insert(story.id, story.clone());
    Ok(story)
}

fn transition(job: &mut FanoutJob, next: JobStatus) -> Result<(), StoreError> {
    if !job.status.can_transition_to(next) {
        return Err(StoreError::conflict(format!(
            "Job {} cannot move from {} to {}",
            job.id, job.status, next
        )));
    }
    job.status = next;
    job.updated_at = Utc::now();
    Ok(())
}

#[async_trait]
impl FollowerGraphStore for MemoryStore {
    async fn add_followers(
        &self,
        author_id: &str,
        follower_ids: &[UserId],
    ) -> Result<u64, StoreError> {
        if author_id.is_empty() || follower_ids.iter().any(String::is_empty) {
            return Err(StoreError::invalid_input("User ids must not be empty"));
        }

        let mut followers = self.followers.write().await;
        let set = followers.entry(author_id.to_string()).or_default();
        let added = follower_ids
            .iter()
            .filter(|id| set.insert((*id).clone()))
            .count();
        Ok(added as u64)
    }

    async fn iterate_followers(
        &self,
        author_id: &str,
        cursor: Option<&FollowerCursor>,
        page_size: usize,
    ) -> Result<FollowerPage, StoreError> {
        validate_page_size(page_size, &self.config)?;
        let after = cursor.map(decode_cursor).transpose()?;

        let followers = self.followers.read().await;
        let Some(set) = followers.get(author_id) else {
            return Ok(FollowerPage::empty(cursor.cloned()));
        };

        let lower = match after {
            Some(id) => Bound::Excluded(id.to_string()),
            None => Bound::Unbounded,
        };
        let mut page: Vec<UserId> = set
            .range((lower, Bound::Unbounded))
            .take(page_size + 1)
            .cloned()
            .collect();

        let done = page.len() <= page_size;
        page.truncate(page_size);

        let next_cursor = match page.last() {
            Some(last) => Some(encode_cursor(last)),
            None => cursor.cloned(),
        };
        Ok(FollowerPage {
            followers: page,
            next_cursor,
            done,
        })
    }

    async fn follower_count(&self, author_id: &str) -> Result<u64, StoreError> {
        let followers = self.followers.read().await;
        Ok(followers.get(author_id).map_or(0, |set| set.len() as u64))
    }
}

#[async_trait]
impl NotificationQueueStore for MemoryStore {
    async fn append_batch(
        &self,
        entries: &[NotificationEntry],
    ) -> Result<AppendSummary, StoreError> {
        validate_batch(entries, &self.config)?;

        let mut queue = self.queue.write().await;
        let mut summary = AppendSummary::default();
        for entry in entries {
            if queue.keys.contains_key(&entry.idempotency_key) {
                summary.duplicates += 1;
                continue;
            }
            queue.keys.insert(entry.idempotency_key, entry.story_id);
            *queue.deliveries.entry(entry.story_id).or_default() += 1;
            let log = queue.logs.entry(entry.recipient_id.clone()).or_default();
            push_in_sequence(log, entry.clone());
            summary.appended += 1;
        }
        Ok(summary)
    }

    async fn trim(&self, recipient_id: &str, max_len: usize) -> Result<u64, StoreError> {
        let mut queue = self.queue.write().await;
        let Some(log) = queue.logs.get_mut(recipient_id) else {
            return Ok(0);
        };
        let excess = log.len().saturating_sub(max_len);
        log.drain(..excess);
        Ok(excess as u64)
    }

    async fn recent(
        &self,
        recipient_id: &str,
        limit: usize,
    ) -> Result<Vec<NotificationEntry>, StoreError> {
        let queue = self.queue.read().await;
        let Some(log) = queue.logs.get(recipient_id) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(limit);
        Ok(log.iter().skip(skip).cloned().collect())
    }

    async fn count_for_story(&self, story_id: &StoryId) -> Result<u64, StoreError> {
        let queue = self.queue.read().await;
        Ok(queue.deliveries.get(story_id).copied().unwrap_or(0))
    }
}

#[async_trait]
impl StoryStore for MemoryStore {
    async fn create_story(&self, author_id: &str, content: &str) -> Result<Story, StoreError> {
        let mut state = self.stories.write().await;
        next_story(&mut state, author_id, content)
    }

    async fn create_story_with_job(
        &self,
        author_id: &str,
        content: &str,
    ) -> Result<(Story, FanoutJob), StoreError> {
        let mut state = self.stories.write().await;
        let mut jobs = self.jobs.write().await;
        let story = next_story(&mut state, author_id, content)?;
        let job = FanoutJob::for_story(&story);
        jobs.insert(job.id, job.clone());
        Ok((story, job))
    }

    async fn get_story(&self, story_id: &StoryId) -> Result<Option<Story>, StoreError> {
        Ok(self.stories.read().await.stories.get(story_id).cloned())
    }
}

#[async_trait]
impl FanoutJobStore for MemoryStore {
    async fn create_job(&self, job: &FanoutJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::conflict(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> Result<Option<FanoutJob>, StoreError> {
        Ok(self.jobs.read().await.get(job_id).cloned())
    }

    async fn begin_run(&self, job_id: &JobId) -> Result<FanoutJob, StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::not_found(format!("Job {job_id}")))?;
        transition(job, JobStatus::InProgress)?;
        job.attempts += 1;
        job.last_error = None;
        Ok(job.clone())
    }

    async fn save_progress(
        &self,
        job_id: &JobId,
        cursor: Option<&FollowerCursor>,
        delivered: u64,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::not_found(format!("Job {job_id}")))?;
        if job.status != JobStatus::InProgress {
            return Err(StoreError::conflict(format!(
                "Job {} is {}, progress can only be saved while in progress",
                job_id, job.status
            )));
        }
        job.cursor = cursor.cloned();
        job.delivered = delivered;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_completed(&self, job_id: &JobId, delivered: u64) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::not_found(format!("Job {job_id}")))?;
        transition(job, JobStatus::Completed)?;
        job.delivered = delivered;
        Ok(())
    }

    async fn mark_failed(&self, job_id: &JobId, error: &str) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::not_found(format!("Job {job_id}")))?;
        transition(job, JobStatus::Failed)?;
        job.last_error = Some(error.to_string());
        Ok(())
    }

    async fn list_jobs(
        &self,
        status: JobStatus,
        limit: usize,
    ) -> Result<Vec<FanoutJob>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<FanoutJob> = jobs
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|job| job.created_at);
        matching.truncate(limit);
        Ok(matching)
    }

    async fn purge_completed(&self, older_than: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status == JobStatus::Completed && job.updated_at < older_than));
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: std::ops::RangeInclusive<u32>) -> Vec<UserId> {
        range.map(|i| format!("f{i:03}")).collect()
    }

    #[tokio::test]
    async fn test_add_followers_is_idempotent() {
        let store = MemoryStore::new();
        assert_eq!(store.add_followers("42", &ids(1..=3)).await.unwrap(), 3);
        assert_eq!(store.add_followers("42", &ids(2..=4)).await.unwrap(), 1);
        assert_eq!(store.follower_count("42").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_pages_cover_set_exactly_once() {
        let store = MemoryStore::new();
        store.add_followers("42", &ids(1..=10)).await.unwrap();

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store
                .iterate_followers("42", cursor.as_ref(), 3)
                .await
                .unwrap();
            seen.extend(page.followers.clone());
            cursor = page.next_cursor;
            if page.done {
                break;
            }
        }
        assert_eq!(seen, ids(1..=10));
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_without_empty_page() {
        let store = MemoryStore::new();
        store.add_followers("42", &ids(1..=4)).await.unwrap();

        let first = store.iterate_followers("42", None, 2).await.unwrap();
        assert!(!first.done);
        let second = store
            .iterate_followers("42", first.next_cursor.as_ref(), 2)
            .await
            .unwrap();
        assert!(second.done);
        assert_eq!(second.followers, ids(3..=4));
    }

    #[tokio::test]
    async fn test_unknown_author_has_empty_done_page() {
        let store = MemoryStore::new();
        let page = store.iterate_followers("nobody", None, 10).await.unwrap();
        assert!(page.done);
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_append_skips_known_keys() {
        let store = MemoryStore::new();
        let story = Story::new("42", "hi", 1);
        let batch: Vec<NotificationEntry> = ids(1..=3)
            .into_iter()
            .map(|r| NotificationEntry::for_story(&story, r, story.notification_payload()))
            .collect();

        let first = store.append_batch(&batch).await.unwrap();
        assert_eq!(first.appended, 3);
        let retry = store.append_batch(&batch).await.unwrap();
        assert_eq!(retry.appended, 0);
        assert_eq!(retry.duplicates, 3);
        assert_eq!(store.count_for_story(&story.id).await.unwrap(), 3);
        assert_eq!(store.stored_entries().await, 3);
    }

    #[tokio::test]
    async fn test_trim_keeps_newest_and_remembers_keys() {
        let store = MemoryStore::new();
        let stories: Vec<Story> = (1..=5).map(|s| Story::new("42", "x", s)).collect();
        let entries: Vec<NotificationEntry> = stories
            .iter()
            .map(|s| NotificationEntry::for_story(s, "reader", s.notification_payload()))
            .collect();
        store.append_batch(&entries).await.unwrap();

        assert_eq!(store.trim("reader", 2).await.unwrap(), 3);
        let recent = store.recent("reader", 10).await.unwrap();
        let sequences: Vec<i64> = recent.iter().map(|e| e.story_sequence).collect();
        assert_eq!(sequences, vec![4, 5]);

        let again = store.append_batch(&entries[..1]).await.unwrap();
        assert_eq!(again.duplicates, 1);
    }

    fn entry(author: &str, sequence: i64) -> NotificationEntry {
        let story = Story::new(author, format!("story {sequence}"), sequence);
        NotificationEntry::for_story(&story, "reader", story.notification_payload())
    }

    fn shape(entries: &[NotificationEntry]) -> Vec<(String, i64)> {
        entries
            .iter()
            .map(|e| (e.author_id.clone(), e.story_sequence))
            .collect()
    }

    #[tokio::test]
    async fn test_late_older_story_is_not_the_newest() {
        let store = MemoryStore::new();
        store.append_batch(&[entry("42", 2)]).await.unwrap();
        store.append_batch(&[entry("42", 1)]).await.unwrap();

        let newest = store.recent("reader", 1).await.unwrap();
        assert_eq!(shape(&newest), vec![("42".to_string(), 2)]);

        assert_eq!(store.trim("reader", 1).await.unwrap(), 1);
        let kept = store.recent("reader", 10).await.unwrap();
        assert_eq!(shape(&kept), vec![("42".to_string(), 2)]);
    }

    #[tokio::test]
    async fn test_late_entries_take_their_author_slots() {
        let store = MemoryStore::new();
        let arrivals = [entry("a", 2), entry("b", 5), entry("a", 3), entry("a", 1), entry("b", 4)];
        for arrival in arrivals {
            store.append_batch(&[arrival]).await.unwrap();
        }

        let log = store.recent("reader", 10).await.unwrap();
        assert_eq!(
            shape(&log),
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 4),
                ("a".to_string(), 2),
                ("a".to_string(), 3),
                ("b".to_string(), 5),
            ]
        );

        store.trim("reader", 2).await.unwrap();
        let kept = store.recent("reader", 10).await.unwrap();
        assert_eq!(shape(&kept), vec![("a".to_string(), 3), ("b".to_string(), 5)]);
    }

    #[tokio::test]
    async fn test_sequences_increase_per_author() {
        let store = MemoryStore::new();
        let a1 = store.create_story("a", "one").await.unwrap();
        let b1 = store.create_story("b", "one").await.unwrap();
        let a2 = store.create_story("a", "two").await.unwrap();
        assert_eq!((a1.sequence, a2.sequence, b1.sequence), (1, 2, 1));
        assert_eq!(store.get_story(&a2.id).await.unwrap(), Some(a2));
    }

    #[tokio::test]
    async fn test_story_and_job_are_stored_together() {
        let store = MemoryStore::new();
        let (story, job) = store.create_story_with_job("42", "hi").await.unwrap();

        assert_eq!(story.sequence, 1);
        assert_eq!(job.story_id, story.id);
        assert_eq!(job.story_sequence, 1);
        assert_eq!(store.get_story(&story.id).await.unwrap(), Some(story));
        let stored = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);

        let err = store.create_story_with_job("", "hi").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert_eq!(store.list_jobs(JobStatus::Pending, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let store = MemoryStore::new();
        let story = store.create_story("42", "hi").await.unwrap();
        let job = FanoutJob::for_story(&story);
        store.create_job(&job).await.unwrap();

        let running = store.begin_run(&job.id).await.unwrap();
        assert_eq!(running.status, JobStatus::InProgress);
        assert_eq!(running.attempts, 1);

        let cursor = encode_cursor("f010");
        store.save_progress(&job.id, Some(&cursor), 10).await.unwrap();
        store.mark_failed(&job.id, "store down").await.unwrap();

        let failed = store.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.cursor, Some(cursor.clone()));
        assert_eq!(failed.last_error.as_deref(), Some("store down"));

        let resumed = store.begin_run(&job.id).await.unwrap();
        assert_eq!(resumed.attempts, 2);
        assert_eq!(resumed.cursor, Some(cursor));
        assert_eq!(resumed.last_error, None);

        store.mark_completed(&job.id, 20).await.unwrap();
        let err = store.begin_run(&job.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_completed_jobs() {
        let store = MemoryStore::new();
        let done = FanoutJob::for_story(&Story::new("42", "a", 1));
        let pending = FanoutJob::for_story(&Story::new("42", "b", 2));
        store.create_job(&done).await.unwrap();
        store.create_job(&pending).await.unwrap();
        store.begin_run(&done.id).await.unwrap();
        store.mark_completed(&done.id, 0).await.unwrap();

        let removed = store
            .purge_completed(Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_job(&done.id).await.unwrap().is_none());
        assert!(store.get_job(&pending.id).await.unwrap().is_some());
    }
}
