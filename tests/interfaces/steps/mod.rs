//! Cucumber step definitions for interface tests.

pub mod notification_feed;
