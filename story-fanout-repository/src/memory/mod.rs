//! In-memory store backend.
//!
//! Implements every store trait on top of process-local maps. Used for local
//! development and as the backing store in tests; state is lost on restart.

mod store;

pub use store::MemoryStore;
