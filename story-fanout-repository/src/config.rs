//! Configuration types for the fan-out store backends.

/// Limits shared by every store backend.
///
/// These bound the size of a single store round trip. The engine never asks
/// for more than `FANOUT_BATCH_SIZE` items, so the defaults only reject
/// misconfigured callers.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of entries accepted by one `append_batch` call.
    ///
    /// Set to `None` to disable the limit.
    pub max_batch_size: Option<usize>,

    /// Maximum number of followers returned by one `iterate_followers` call.
    pub max_page_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_batch_size: Some(10_000),
            max_page_size: 10_000,
        }
    }
}

impl StoreConfig {
    /// Create a config with no append batch limit.
    pub fn unlimited() -> Self {
        Self {
            max_batch_size: None,
            ..Self::default()
        }
    }

    /// Create a config with a custom append batch limit.
    pub fn with_max_batch_size(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: Some(max_batch_size),
            ..Self::default()
        }
    }
}
