//! Dependency initialization and wiring for the fan-out service.

use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use story_fanout_repository::{MemoryStore, PostgresStore};

use super::{FanoutConfig, ServerConfig};
use crate::orchestrator::FanoutStores;
use crate::service::FanoutService;
use crate::ServiceError;

/// Default connection pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 20;

/// Default connection retry interval in seconds.
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// Backend the stores run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// PostgreSQL, durable across restarts.
    Postgres,
    /// Process memory. State is lost on exit.
    Memory,
}

impl StoreBackend {
    /// Parse the backend from `STORE_BACKEND` ("postgres" or "memory").
    ///
    /// Defaults to "postgres" if not set or invalid.
    fn from_env() -> Self {
        match env::var("STORE_BACKEND")
            .unwrap_or_else(|_| "postgres".to_string())
            .to_lowercase()
            .as_str()
        {
            "postgres" | "postgresql" => Self::Postgres,
            "memory" | "in-memory" => Self::Memory,
            _ => {
                warn!("Invalid STORE_BACKEND, defaulting to 'postgres'");
                Self::Postgres
            }
        }
    }
}

/// Connection mode for the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Fail immediately if connection fails.
    FailFast,
    /// Retry connection every `STORE_RETRY_INTERVAL_SECS` until successful.
    Retry,
}

impl ConnectionMode {
    /// Parse connection mode from `STORE_CONNECTION_MODE`.
    ///
    /// Valid values: "fail-fast" or "retry" (case-insensitive)
    /// Defaults to "retry" if not set or invalid.
    fn from_env() -> Self {
        match env::var("STORE_CONNECTION_MODE")
            .unwrap_or_else(|_| "retry".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!("Invalid STORE_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    /// The fan-out service, ready to accept work.
    pub service: FanoutService,
    /// Where the HTTP server binds.
    pub server: ServerConfig,
    postgres: Option<PostgresStore>,
}

impl Dependencies {
    /// Initialize all dependencies from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `STORE_BACKEND`: "postgres" or "memory" (default: postgres)
    /// - `DATABASE_URL`: PostgreSQL connection string (required for postgres)
    /// - `DATABASE_MAX_CONNECTIONS`: Pool size (default: 20)
    /// - `STORE_CONNECTION_MODE`: Connection mode - "fail-fast" or "retry" (default: retry)
    /// - `STORE_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `FANOUT_*`: Engine tuning, see [`FanoutConfig::from_env`]
    /// - `SERVER_HOST` / `SERVER_PORT`: HTTP bind address (default: 127.0.0.1:8080)
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(ServiceError)` - If initialization fails (only in fail-fast mode for connectivity)
    pub async fn new() -> Result<Self, ServiceError> {
        let backend = StoreBackend::from_env();
        let config = FanoutConfig::from_env();
        let server = ServerConfig::from_env();

        info!(
            backend = ?backend,
            batch_size = config.batch_size,
            workers_per_job = config.workers_per_job,
            max_concurrent_jobs = config.max_concurrent_jobs,
            max_attempts = config.retry.max_attempts,
            "Initializing dependencies"
        );

        match backend {
            StoreBackend::Memory => {
                warn!("Using the in-memory store, state will be lost on exit");
                let mut deps = Self::with_memory_store(config)?;
                deps.server = server;
                Ok(deps)
            }
            StoreBackend::Postgres => {
                let database_url = env::var("DATABASE_URL")
                    .map_err(|_| ServiceError::config("DATABASE_URL must be set"))?;
                let max_connections = env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(DEFAULT_MAX_CONNECTIONS);
                let connection_mode = ConnectionMode::from_env();
                let retry_interval = env::var("STORE_RETRY_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(DEFAULT_RETRY_INTERVAL_SECS);

                info!(
                    max_connections,
                    connection_mode = ?connection_mode,
                    retry_interval_secs = retry_interval,
                    "Connecting to PostgreSQL"
                );

                let store = Self::connect_to_postgres(
                    &database_url,
                    max_connections,
                    connection_mode,
                    Duration::from_secs(retry_interval),
                )
                .await?;

                info!("PostgreSQL connection established");

                // Exits if the schema cannot be brought up to date
                store
                    .migrate()
                    .await
                    .map_err(|e| ServiceError::config(format!("Failed to run migrations: {}", e)))?;

                let stores = FanoutStores::from_backend(Arc::new(store.clone()));
                let service = FanoutService::new(stores, config)?;

                Ok(Self {
                    service,
                    server,
                    postgres: Some(store),
                })
            }
        }
    }

    /// Wire the service over a fresh in-memory store.
    pub fn with_memory_store(config: FanoutConfig) -> Result<Self, ServiceError> {
        let stores = FanoutStores::from_backend(Arc::new(MemoryStore::new()));
        let service = FanoutService::new(stores, config)?;

        Ok(Self {
            service,
            server: ServerConfig::default(),
            postgres: None,
        })
    }

    /// Release the database pool, if any.
    pub async fn close(&self) {
        if let Some(store) = &self.postgres {
            store.close().await;
            info!("PostgreSQL pool closed");
        }
    }

    /// Connect to PostgreSQL with retry logic based on connection mode.
    async fn connect_to_postgres(
        url: &str,
        max_connections: u32,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<PostgresStore, ServiceError> {
        loop {
            match PostgresStore::connect(url, max_connections).await {
                Ok(store) => return Ok(store),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(ServiceError::config(format!(
                            "Failed to connect to PostgreSQL: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to PostgreSQL, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }
}
