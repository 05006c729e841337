//! Processor module for story fan-out.
//!
//! Turns a page of follower ids into notification entries.

mod notification_builder;

pub use notification_builder::NotificationBuilder;
