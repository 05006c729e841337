//! Backoff and timeout policy for store calls.
//!
//! Every store call made by the engine runs under a per-call timeout. Calls
//! that fail transiently (connectivity loss, pool exhaustion, timeout) are
//! retried with jittered exponential backoff; any other failure returns at
//! once.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use story_fanout_repository::StoreError;
use tokio::time::timeout;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::warn;

use crate::errors::FanoutError;

/// Attempt budget, backoff and timeout for one kind of store call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per call, first attempt included.
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles on every further attempt.
    pub base_delay: Duration,
    /// Ceiling for a single delay.
    pub max_delay: Duration,
    /// Deadline for a single attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            call_timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delays between attempts: `base`, `2 * base`, `4 * base`, ... up to
    /// `max_delay`, each scaled by a random jitter factor.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let factor = (self.base_delay.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run one attempt under the call timeout.
    pub async fn call_once<T, Fut>(&self, call: Fut) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.call_timeout.as_millis() as u64)),
        }
    }

    /// Run `action` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    ///
    /// `action` must be safe to repeat: it is re-invoked from scratch on every
    /// attempt.
    ///
    /// # Returns
    ///
    /// * `Ok(T)` - The first successful result
    /// * `Err(FanoutError::RetriesExhausted)` - Every attempt failed transiently
    /// * `Err(FanoutError)` - A non-transient failure, mapped from [`StoreError`]
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut action: F) -> Result<T, FanoutError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = AtomicU32::new(0);

        let result = RetryIf::spawn(
            self.delays(),
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                self.call_once(action())
            },
            |e: &StoreError| {
                let transient = e.is_transient();
                if transient {
                    warn!(
                        operation,
                        attempt = attempts.load(Ordering::Relaxed),
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Transient store failure"
                    );
                }
                transient
            },
        )
        .await;

        result.map_err(|e| {
            if e.is_transient() {
                FanoutError::RetriesExhausted {
                    operation,
                    attempts: attempts.load(Ordering::Relaxed),
                    last_error: e.to_string(),
                }
            } else {
                e.into()
            }
        })
    }
}
