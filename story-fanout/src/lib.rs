//! # Story Fan-out
//!
//! Fan-out-on-write notification delivery: when an author publishes a story,
//! every follower receives exactly one entry in their inbox, even when the
//! backing stores fail transiently or the process restarts mid-delivery.
//!
//! ## Architecture
//!
//! Each fan-out job follows the Consumer-Processor-Loader pattern:
//!
//! 1. **Consumer**: Pages through the author's follower set
//! 2. **Processor**: Builds one idempotently keyed entry per follower
//! 3. **Loader**: Appends each batch to the notification queue
//! 4. **Orchestrator**: Drives a job to completion and persists its cursor
//!
//! ## Modules
//!
//! - [`config`]: Configuration and dependency initialization
//! - [`consumer`]: Follower page reader
//! - [`processor`]: Notification entry builder
//! - [`loader`]: Notification batch writer
//! - [`orchestrator`]: The fan-out engine
//! - [`service`]: Operations exposed to the request layer
//! - [`server`]: HTTP routes
//! - [`retry`]: Backoff and timeout policy for store calls
//! - [`errors`]: Error types for fan-out

pub mod config;
pub mod consumer;
pub mod errors;
pub mod loader;
pub mod orchestrator;
pub mod processor;
pub mod retry;
pub mod server;
pub mod service;

pub use config::{Dependencies, FanoutConfig};
pub use errors::FanoutError;
pub use orchestrator::FanoutEngine;
pub use service::FanoutService;

use thiserror::Error;

/// Errors that can occur during service initialization or execution.
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Fan-out error.
    #[error("Fan-out error: {0}")]
    Fanout(#[from] FanoutError),

    /// Socket or listener error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
