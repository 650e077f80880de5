//! notifeed - per-user notification feeds
//!
//! Aggregated activity feeds with a denormalized unseen count that is
//! recomputed after every mutation and published on change.

pub mod activity;
pub mod aggregator;
pub mod bus;
pub mod config;
pub mod feed;
pub mod lock;
pub mod storage;
pub mod utils;
