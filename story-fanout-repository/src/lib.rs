//! # Story Fan-out Repository
//!
//! This crate provides the storage traits the fan-out engine is written
//! against, together with two implementations: PostgreSQL for production and
//! an in-memory backend for development and tests.
//!
//! Every store is safe to call concurrently, and every write is idempotent, so
//! callers may retry any failed call as a whole.

pub mod config;
pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod postgres;
pub mod types;
pub mod utils;

pub use config::StoreConfig;
pub use errors::StoreError;
pub use interfaces::{FanoutJobStore, FollowerGraphStore, NotificationQueueStore, StoryStore};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use types::AppendSummary;
