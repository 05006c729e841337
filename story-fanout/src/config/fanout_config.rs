//! Fan-out tuning read from the environment.

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::errors::FanoutError;
use crate::retry::RetryPolicy;

/// Largest accepted `FANOUT_BATCH_SIZE`.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Tuning for the fan-out engine and service.
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Followers per page, and entries per append call.
    pub batch_size: usize,
    /// Append calls in flight per job. 1 processes batches strictly in sequence.
    pub workers_per_job: usize,
    /// Jobs running at once across the service.
    pub max_concurrent_jobs: usize,
    /// Backoff and timeout for every store call.
    pub retry: RetryPolicy,
    /// When set, recipients are trimmed to this many entries after each batch.
    pub inbox_max_len: Option<usize>,
    /// Interval between progress log lines.
    pub progress_interval: Duration,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            workers_per_job: 4,
            max_concurrent_jobs: 16,
            retry: RetryPolicy::default(),
            inbox_max_len: None,
            progress_interval: Duration::from_secs(10),
        }
    }
}

/// Parse `name` from the environment, falling back to `default` when unset or
/// invalid.
fn env_or<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!(variable = name, value = %raw, default = %default, "Invalid value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Like [`env_or`], additionally rejecting values outside `min..=max`.
fn env_in_range<T>(name: &str, default: T, min: T, max: T) -> T
where
    T: FromStr + std::fmt::Display + PartialOrd + Copy,
{
    let value = env_or(name, default);
    if value < min || value > max {
        warn!(
            variable = name,
            value = %value,
            min = %min,
            max = %max,
            default = %default,
            "Value out of range, using default"
        );
        return default;
    }
    value
}

impl FanoutConfig {
    /// Read the fan-out configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `FANOUT_BATCH_SIZE`: Followers per batch, 1 to 10000 (default: 500)
    /// - `FANOUT_WORKERS_PER_JOB`: Append calls in flight per job (default: 4)
    /// - `FANOUT_MAX_CONCURRENT_JOBS`: Jobs running at once (default: 16)
    /// - `FANOUT_MAX_ATTEMPTS`: Attempts per store call (default: 5)
    /// - `FANOUT_BACKOFF_BASE_MS`: First backoff delay (default: 50)
    /// - `FANOUT_BACKOFF_MAX_MS`: Backoff ceiling (default: 5000)
    /// - `FANOUT_STORE_TIMEOUT_MS`: Per-call timeout (default: 5000)
    /// - `FANOUT_INBOX_MAX_LEN`: Trim inboxes to this length (default: unset)
    /// - `FANOUT_PROGRESS_INTERVAL_SECS`: Progress log interval (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_attempts: env_in_range("FANOUT_MAX_ATTEMPTS", defaults.retry.max_attempts, 1, 100),
            base_delay: Duration::from_millis(env_in_range(
                "FANOUT_BACKOFF_BASE_MS",
                defaults.retry.base_delay.as_millis() as u64,
                1,
                60_000,
            )),
            max_delay: Duration::from_millis(env_in_range(
                "FANOUT_BACKOFF_MAX_MS",
                defaults.retry.max_delay.as_millis() as u64,
                1,
                600_000,
            )),
            call_timeout: Duration::from_millis(env_in_range(
                "FANOUT_STORE_TIMEOUT_MS",
                defaults.retry.call_timeout.as_millis() as u64,
                1,
                600_000,
            )),
        };

        let inbox_max_len = match env::var("FANOUT_INBOX_MAX_LEN") {
            Ok(raw) => match raw.trim().parse::<usize>() {
                Ok(len) if len > 0 => Some(len),
                _ => {
                    warn!(value = %raw, "Invalid FANOUT_INBOX_MAX_LEN, inbox trimming disabled");
                    None
                }
            },
            Err(_) => None,
        };

        Self {
            batch_size: env_in_range("FANOUT_BATCH_SIZE", defaults.batch_size, 1, MAX_BATCH_SIZE),
            workers_per_job: env_in_range("FANOUT_WORKERS_PER_JOB", defaults.workers_per_job, 1, 64),
            max_concurrent_jobs: env_in_range(
                "FANOUT_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
                1,
                10_000,
            ),
            retry,
            inbox_max_len,
            progress_interval: Duration::from_secs(env_in_range(
                "FANOUT_PROGRESS_INTERVAL_SECS",
                defaults.progress_interval.as_secs(),
                1,
                3_600,
            )),
        }
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), FanoutError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(FanoutError::invalid_input(format!(
                "batch_size must be between 1 and {MAX_BATCH_SIZE}, got {}",
                self.batch_size
            )));
        }
        if self.workers_per_job == 0 {
            return Err(FanoutError::invalid_input("workers_per_job must be at least 1"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(FanoutError::invalid_input("max_concurrent_jobs must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(FanoutError::invalid_input("max_attempts must be at least 1"));
        }
        if self.inbox_max_len == Some(0) {
            return Err(FanoutError::invalid_input("inbox_max_len must be at least 1"));
        }
        Ok(())
    }
}

/// HTTP bind address.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Read `SERVER_HOST` and `SERVER_PORT`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env::var("SERVER_HOST").unwrap_or(defaults.host),
            port: env_or("SERVER_PORT", defaults.port),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, FanoutError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| FanoutError::invalid_input(format!("Invalid server address: {e}")))
    }
}
