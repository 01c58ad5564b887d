//! Process-local caches.
//!
//! - [`CacheLayer`]: write-through LRU over any [`crate::storage::EntityStore`]
//! - [`TtlLruCache`]: the bounded, TTL-aware LRU map shared by the entity,
//!   embedding, and summary caches

mod entity;
mod ttl;

pub use entity::{AccessCount, CacheLayer, CacheStats};
pub use ttl::TtlLruCache;
