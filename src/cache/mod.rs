//! Bounded LRU text cache (spec.md §4 component C8).

mod text_cache;

pub use text_cache::{TextCache, TextCacheConfig};
