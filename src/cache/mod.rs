pub mod graph_cache;

pub use graph_cache::{cache_key, CacheEntry, CacheStats, GraphCache, DEFAULT_CAPACITY, DEFAULT_TTL};
