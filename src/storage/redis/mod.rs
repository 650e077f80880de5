//! Redis storage implementations.

mod count_store;
mod timeline_store;

pub use count_store::RedisCountStore;
pub use timeline_store::RedisTimelineStore;
