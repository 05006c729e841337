//! Integration tests for the fan-out service: publishing, follower updates,
//! per-author ordering, cancellation and recovery after shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use story_fanout::errors::FanoutError;
use story_fanout::orchestrator::FanoutStores;
use story_fanout::FanoutService;
use story_fanout_repository::{FanoutJobStore, MemoryStore, NotificationQueueStore};
use story_fanout_shared::{JobStatus, UserId};

use common::{
    follower_ids, stores_with_queue, test_config, wait_for_progress, wait_for_status, FlakyQueue,
    UnwritableStories,
};

fn memory_service(batch_size: usize, workers_per_job: usize) -> (FanoutService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = FanoutService::new(
        FanoutStores::from_backend(store.clone()),
        test_config(batch_size, workers_per_job),
    )
    .unwrap();
    (service, store)
}

/// Service whose appends are slow enough to interrupt a job mid-way.
fn slow_service(store: Arc<MemoryStore>) -> FanoutService {
    let queue = Arc::new(FlakyQueue::new(store.clone()).with_delay(Duration::from_millis(5)));
    FanoutService::new(stores_with_queue(store, queue), test_config(10, 1)).unwrap()
}

async fn wait_until_idle(service: &FanoutService) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    while service.active_jobs() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "jobs still running");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_twenty_stories_reach_ten_thousand_followers_in_order() {
    let (service, store) = memory_service(500, 4);
    let followers: Vec<UserId> = (1..=10_000).map(|i| i.to_string()).collect();

    assert_eq!(service.add_followers("42", &followers).await.unwrap(), 10_000);
    assert_eq!(service.add_followers("42", &followers).await.unwrap(), 0);
    assert_eq!(service.follower_count("42").await.unwrap(), 10_000);

    let mut receipts = Vec::new();
    for i in 1..=20 {
        receipts.push(
            service
                .publish_story("42", &format!("Story {i} content"))
                .await
                .unwrap(),
        );
    }
    let sequences: Vec<i64> = receipts.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, (1..=20).collect::<Vec<i64>>());

    for receipt in &receipts {
        let job = wait_for_status(&service, receipt.job_id, JobStatus::Completed).await;
        assert_eq!(job.delivered, 10_000);
        assert_eq!(store.count_for_story(&receipt.story_id).await.unwrap(), 10_000);
    }
    assert_eq!(store.stored_entries().await, 200_000);

    let expected: Vec<i64> = (1..=20).collect();
    for follower in &followers {
        let inbox = store.recent(follower, 100).await.unwrap();
        let sequences: Vec<i64> = inbox.iter().map(|e| e.story_sequence).collect();
        assert_eq!(sequences, expected, "follower {follower}");
    }
}

#[tokio::test]
async fn test_add_followers_is_idempotent() {
    let (service, _) = memory_service(100, 2);
    let followers = follower_ids(250);

    assert_eq!(service.add_followers("42", &followers).await.unwrap(), 250);
    assert_eq!(service.add_followers("42", &followers[..10]).await.unwrap(), 0);
    assert_eq!(
        service
            .add_followers("42", &["follower-00001".to_string(), "new".to_string()])
            .await
            .unwrap(),
        1
    );
    assert_eq!(service.follower_count("42").await.unwrap(), 251);
}

#[tokio::test]
async fn test_invalid_input_is_rejected_without_side_effects() {
    let (service, store) = memory_service(100, 1);

    let err = service.add_followers("", &follower_ids(3)).await.unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));

    let err = service
        .add_followers("42", &["ok".to_string(), " ".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));

    let err = service
        .add_followers("42", &["ok".to_string(), "42".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));
    assert_eq!(service.follower_count("42").await.unwrap(), 0);

    let err = service.publish_story("", "content").await.unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));
    assert!(store.list_jobs(JobStatus::Pending, 10).await.unwrap().is_empty());

    let err = service.job_status(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, FanoutError::JobNotFound(_)));
}

#[tokio::test]
async fn test_failed_publish_stores_neither_story_nor_job() {
    let store = Arc::new(MemoryStore::new());
    let stores = FanoutStores {
        stories: Arc::new(UnwritableStories::new(store.clone())),
        ..FanoutStores::from_backend(store.clone())
    };
    let broken = FanoutService::new(stores, test_config(100, 1)).unwrap();

    let err = broken.publish_story("42", "lost").await.unwrap_err();
    assert!(matches!(err, FanoutError::StoreUnavailable(_)));
    assert_eq!(broken.active_jobs(), 0);
    assert!(store.list_jobs(JobStatus::Pending, 10).await.unwrap().is_empty());

    // The failed publish consumed no sequence number.
    let service =
        FanoutService::new(FanoutStores::from_backend(store.clone()), test_config(100, 1)).unwrap();
    let receipt = service.publish_story("42", "kept").await.unwrap();
    assert_eq!(receipt.sequence, 1);
    let job = wait_for_status(&service, receipt.job_id, JobStatus::Completed).await;
    assert_eq!(job.story_sequence, 1);
}

#[tokio::test]
async fn test_publish_without_followers_completes() {
    let (service, store) = memory_service(100, 1);

    let receipt = service.publish_story("nobody-follows", "hi").await.unwrap();
    let job = wait_for_status(&service, receipt.job_id, JobStatus::Completed).await;

    assert_eq!(job.delivered, 0);
    assert_eq!(store.stored_entries().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_authors_fan_out_in_parallel_and_stay_ordered() {
    let (service, store) = memory_service(50, 4);
    let followers = follower_ids(300);
    for author in ["a", "b", "c"] {
        service.add_followers(author, &followers).await.unwrap();
    }

    let mut receipts = Vec::new();
    for round in 1..=5 {
        for author in ["a", "b", "c"] {
            receipts.push(
                service
                    .publish_story(author, &format!("{author} {round}"))
                    .await
                    .unwrap(),
            );
        }
    }
    wait_until_idle(&service).await;

    for receipt in &receipts {
        let job = service.job_status(receipt.job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(store.count_for_story(&receipt.story_id).await.unwrap(), 300);
    }

    for follower in followers.iter().step_by(37) {
        let inbox = store.recent(follower, 100).await.unwrap();
        assert_eq!(inbox.len(), 15);
        for author in ["a", "b", "c"] {
            let sequences: Vec<i64> = inbox
                .iter()
                .filter(|e| e.author_id == author)
                .map(|e| e.story_sequence)
                .collect();
            assert_eq!(sequences, vec![1, 2, 3, 4, 5], "author {author}, follower {follower}");
        }
    }
}

#[tokio::test]
async fn test_cancelled_job_resumes_to_completion() {
    let store = Arc::new(MemoryStore::new());
    let service = slow_service(store.clone());
    service.add_followers("42", &follower_ids(500)).await.unwrap();

    let receipt = service.publish_story("42", "slow").await.unwrap();
    wait_for_progress(&service, receipt.job_id).await;
    service.cancel_job(receipt.job_id).await.unwrap();

    let cancelled = wait_for_status(&service, receipt.job_id, JobStatus::Failed).await;
    assert_eq!(cancelled.last_error.as_deref(), Some("cancelled"));
    assert!(cancelled.delivered < 500);
    wait_until_idle(&service).await;

    // A cancelled job is not picked up by startup recovery.
    assert_eq!(service.resume_incomplete().await.unwrap(), 0);

    service.resume_job(receipt.job_id).await.unwrap();
    let finished = wait_for_status(&service, receipt.job_id, JobStatus::Completed).await;
    assert_eq!(finished.delivered, 500);
    assert_eq!(store.count_for_story(&receipt.story_id).await.unwrap(), 500);
    assert_eq!(store.stored_entries().await, 500);
}

#[tokio::test]
async fn test_resume_rejects_completed_and_running_jobs() {
    let store = Arc::new(MemoryStore::new());
    let service = slow_service(store.clone());
    service.add_followers("42", &follower_ids(300)).await.unwrap();

    let receipt = service.publish_story("42", "busy").await.unwrap();
    wait_for_progress(&service, receipt.job_id).await;
    let err = service.resume_job(receipt.job_id).await.unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));

    wait_for_status(&service, receipt.job_id, JobStatus::Completed).await;
    wait_until_idle(&service).await;
    let err = service.resume_job(receipt.job_id).await.unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));

    let err = service.cancel_job(receipt.job_id).await.unwrap_err();
    assert!(matches!(err, FanoutError::InvalidInput(_)));
    assert_eq!(store.count_for_story(&receipt.story_id).await.unwrap(), 300);
}

#[tokio::test]
async fn test_shutdown_interrupts_jobs_and_restart_recovers_them() {
    let store = Arc::new(MemoryStore::new());
    let first = slow_service(store.clone());
    first.add_followers("42", &follower_ids(800)).await.unwrap();

    let running = first.publish_story("42", "first").await.unwrap();
    let queued = first.publish_story("42", "second").await.unwrap();
    wait_for_progress(&first, running.job_id).await;

    first.shutdown().await;
    assert_eq!(first.active_jobs(), 0);

    let interrupted = first.job_status(running.job_id).await.unwrap();
    assert_eq!(interrupted.status, JobStatus::Failed);
    assert_eq!(interrupted.last_error.as_deref(), Some("interrupted by shutdown"));
    assert!(interrupted.delivered < 800);
    let waiting = first.job_status(queued.job_id).await.unwrap();
    assert_eq!(waiting.status, JobStatus::Failed);
    assert_eq!(waiting.delivered, 0);

    let err = first.publish_story("42", "too late").await.unwrap_err();
    assert!(matches!(err, FanoutError::ShuttingDown));

    // Restart over the same durable state.
    let second = FanoutService::new(FanoutStores::from_backend(store.clone()), test_config(100, 4))
        .unwrap();
    assert_eq!(second.resume_incomplete().await.unwrap(), 2);

    for receipt in [&running, &queued] {
        let job = wait_for_status(&second, receipt.job_id, JobStatus::Completed).await;
        assert_eq!(job.delivered, 800);
        assert_eq!(store.count_for_story(&receipt.story_id).await.unwrap(), 800);
    }
    assert_eq!(store.stored_entries().await, 1_600);

    let inbox = store.recent("follower-00001", 10).await.unwrap();
    let sequences: Vec<i64> = inbox.iter().map(|e| e.story_sequence).collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test]
async fn test_purge_removes_completed_jobs() {
    let (service, _) = memory_service(100, 1);
    service.add_followers("42", &follower_ids(10)).await.unwrap();

    let receipt = service.publish_story("42", "old news").await.unwrap();
    wait_for_status(&service, receipt.job_id, JobStatus::Completed).await;
    wait_until_idle(&service).await;

    let purged = service
        .purge_completed(Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(purged, 1);

    let err = service.job_status(receipt.job_id).await.unwrap_err();
    assert!(matches!(err, FanoutError::JobNotFound(_)));
}
