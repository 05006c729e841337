//! Configuration and dependency initialization.

mod dependencies;
mod fanout_config;

pub use dependencies::{ConnectionMode, Dependencies, StoreBackend};
pub use fanout_config::{FanoutConfig, ServerConfig};
