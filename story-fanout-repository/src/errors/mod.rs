//! Error types for the story fan-out repository.
//!
//! This module provides a unified error type for all store operations.

mod store_error;

pub use store_error::StoreError;
