use std::sync::Arc;

use story_fanout_repository::FollowerGraphStore;
use story_fanout_shared::{FollowerCursor, FollowerPage};
use tracing::{debug, instrument};

use crate::errors::FanoutError;
use crate::retry::RetryPolicy;

/// Reads follower pages for the engine.
///
/// Page reads are retried under the same policy as appends, so a flaky
/// follower store only fails a job once the attempt budget is spent.
pub struct FollowerPager {
    store: Arc<dyn FollowerGraphStore>,
    retry: RetryPolicy,
    page_size: usize,
}

impl FollowerPager {
    pub fn new(store: Arc<dyn FollowerGraphStore>, retry: RetryPolicy, page_size: usize) -> Self {
        Self {
            store,
            retry,
            page_size,
        }
    }

    /// Fetch the page after `cursor`.
    #[instrument(skip(self, cursor), fields(page_size = self.page_size))]
    pub async fn next_page(
        &self,
        author_id: &str,
        cursor: Option<&FollowerCursor>,
    ) -> Result<FollowerPage, FanoutError> {
        let page = self
            .retry
            .run("iterate_followers", move || {
                self.store
                    .iterate_followers(author_id, cursor, self.page_size)
            })
            .await?;

        debug!(
            followers = page.followers.len(),
            done = page.done,
            "Fetched follower page"
        );
        Ok(page)
    }
}
