//! Result types for store operations.

/// Outcome of a single `append_batch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppendSummary {
    /// Entries that were not stored before this call.
    pub appended: u64,
    /// Entries skipped because their idempotency key already existed.
    pub duplicates: u64,
}
