use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared by every job run by one engine.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    jobs_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    batches_delivered: AtomicU64,
    entries_appended: AtomicU64,
    duplicates_skipped: AtomicU64,
}

/// Point-in-time copy of [`EngineMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub jobs_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub batches_delivered: u64,
    pub entries_appended: u64,
    pub duplicates_skipped: u64,
}

impl EngineMetrics {
    pub(crate) fn job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn batch_delivered(&self, appended: u64, duplicates: u64) {
        self.batches_delivered.fetch_add(1, Ordering::Relaxed);
        self.entries_appended.fetch_add(appended, Ordering::Relaxed);
        self.duplicates_skipped.fetch_add(duplicates, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            batches_delivered: self.batches_delivered.load(Ordering::Relaxed),
            entries_appended: self.entries_appended.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
        }
    }
}
