pub mod result_cache;

pub use result_cache::{CacheBackend, CacheEntry, InMemoryBackend, ResultCache};
