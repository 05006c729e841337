use std::sync::Arc;

use story_fanout_repository::{AppendSummary, NotificationQueueStore};
use story_fanout_shared::NotificationEntry;
use tracing::{debug, instrument, warn};

use crate::errors::FanoutError;
use crate::retry::RetryPolicy;

/// Writes notification batches into recipient inboxes.
///
/// The loader is responsible for:
/// - Appending each batch as one idempotent store call, retried as a whole
/// - Trimming inboxes after a batch when a maximum length is configured
pub struct NotificationLoader {
    store: Arc<dyn NotificationQueueStore>,
    retry: RetryPolicy,
    inbox_max_len: Option<usize>,
}

impl NotificationLoader {
    pub fn new(store: Arc<dyn NotificationQueueStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            inbox_max_len: None,
        }
    }

    /// Trim every recipient of a loaded batch to `max_len` entries.
    pub fn with_inbox_max_len(mut self, max_len: Option<usize>) -> Self {
        self.inbox_max_len = max_len;
        self
    }

    /// Append one batch.
    ///
    /// Retrying never duplicates entries: keys already stored by an earlier,
    /// seemingly failed attempt come back as duplicates.
    #[instrument(skip(self, entries), fields(entry_count = entries.len()))]
    pub async fn load(&self, entries: &[NotificationEntry]) -> Result<AppendSummary, FanoutError> {
        if entries.is_empty() {
            return Ok(AppendSummary::default());
        }

        let summary = self
            .retry
            .run("append_batch", move || self.store.append_batch(entries))
            .await?;

        if summary.duplicates > 0 {
            debug!(
                appended = summary.appended,
                duplicates = summary.duplicates,
                "Batch partially delivered before, skipped known keys"
            );
        }

        self.trim_recipients(entries).await;
        Ok(summary)
    }

    /// Best-effort inbox trimming. Failures are logged and never fail the batch.
    async fn trim_recipients(&self, entries: &[NotificationEntry]) {
        let Some(max_len) = self.inbox_max_len else {
            return;
        };

        for entry in entries {
            let recipient = entry.recipient_id.as_str();
            match self
                .retry
                .call_once(self.store.trim(recipient, max_len))
                .await
            {
                Ok(removed) if removed > 0 => {
                    debug!(recipient_id = recipient, removed, "Trimmed inbox");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(recipient_id = recipient, error = %e, "Failed to trim inbox");
                }
            }
        }
    }
}
