//! Query result caching.
//!
//! - `keys.rs` - cache keys tagged with the entities they depend on
//! - `result_cache.rs` - TTL + LRU cache with tag invalidation and statistics

mod keys;
mod result_cache;

pub use keys::CacheKey;
pub use result_cache::{CacheStats, ResultCache};
