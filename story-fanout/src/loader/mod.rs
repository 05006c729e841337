//! Loader module for story fan-out.
//!
//! Appends notification batches to the queue store and trims inboxes.

mod notification_loader;

pub use notification_loader::NotificationLoader;
