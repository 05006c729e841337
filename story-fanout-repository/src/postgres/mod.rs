//! PostgreSQL implementation of the fan-out stores.
//!
//! A single [`PostgresStore`] implements every store trait over one
//! connection pool.
//!
//! ## Database Tables
//!
//! - `followers`: author to follower edges, paged by keyset on `follower_id`
//! - `author_sequences`: last story sequence handed out per author
//! - `stories`: published stories
//! - `notification_keys`: every idempotency key ever delivered
//! - `notification_entries`: per-recipient inbox, ordered by `position`
//! - `fanout_jobs`: job state and resume cursors

mod fanout_job_store;
mod follower_graph;
mod notification_queue;
mod story_store;

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::StoreConfig;
use crate::errors::StoreError;

/// PostgreSQL backend for all fan-out stores.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    config: StoreConfig,
}

impl PostgresStore {
    /// Connect to `database_url` with a pool of at most `max_connections`.
    ///
    /// # Returns
    ///
    /// * `Ok(PostgresStore)` - Connected store, migrations not yet applied
    /// * `Err(StoreError::Unavailable)` - If the database cannot be reached
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;

        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            config: StoreConfig::default(),
        }
    }

    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("src/postgres/migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::database(format!("Migration failed: {e}")))?;
        info!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
