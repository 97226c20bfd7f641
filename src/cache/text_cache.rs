//! Bounded LRU text cache (spec.md §4 component C8)
//!
//! Bounded by entry count *and* a UTF-8 byte budget; promotes the entry on
//! every hit (teacher's `lru` crate convention, used here the same way the
//! teacher uses it for query-embedding caching).

use std::num::NonZeroUsize;

use lru::LruCache;

use crate::VolumeId;

#[derive(Debug, Clone)]
pub struct TextCacheConfig {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for TextCacheConfig {
    fn default() -> Self {
        Self { max_entries: 1000, max_bytes: 8 * 1024 * 1024 }
    }
}

/// Caches hydrated volume text by id so repeated searches over the same
/// hot set skip re-reading from storage.
pub struct TextCache {
    cache: LruCache<VolumeId, String>,
    max_bytes: usize,
    current_bytes: usize,
}

impl TextCache {
    pub fn new(config: TextCacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries.max(1)).unwrap();
        Self { cache: LruCache::new(cap), max_bytes: config.max_bytes, current_bytes: 0 }
    }

    /// Returns the cached text, promoting it to most-recently-used.
    pub fn get(&mut self, id: &VolumeId) -> Option<&str> {
        self.cache.get(id).map(|s| s.as_str())
    }

    /// Inserts or updates an entry, evicting least-recently-used entries
    /// (by count and by byte budget) as needed.
    pub fn put(&mut self, id: VolumeId, text: String) {
        if text.len() > self.max_bytes {
            // A single entry too large to ever fit is simply not cached.
            return;
        }
        if let Some(old) = self.cache.peek(&id) {
            self.current_bytes = self.current_bytes.saturating_sub(old.len());
        }
        self.current_bytes += text.len();
        if let Some((_, evicted)) = self.cache.push(id, text) {
            self.current_bytes = self.current_bytes.saturating_sub(evicted.len());
        }
        while self.current_bytes > self.max_bytes {
            match self.cache.pop_lru() {
                Some((_, evicted)) => self.current_bytes = self.current_bytes.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    pub fn remove(&mut self, id: &VolumeId) {
        if let Some(removed) = self.cache.pop(id) {
            self.current_bytes = self.current_bytes.saturating_sub(removed.len());
        }
    }

    pub fn clear(&mut self) {
        self.cache.clear();
        self.current_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_promotes_entry_to_most_recently_used() {
        let mut cache = TextCache::new(TextCacheConfig { max_entries: 2, max_bytes: 1024 });
        cache.put("a".into(), "a-text".into());
        cache.put("b".into(), "b-text".into());
        // touch "a" so it becomes MRU
        assert!(cache.get(&"a".to_string()).is_some());
        cache.put("c".into(), "c-text".into());
        // "b" should have been evicted, not "a"
        assert!(cache.get(&"b".to_string()).is_none());
        assert!(cache.get(&"a".to_string()).is_some());
    }

    #[test]
    fn byte_budget_evicts_even_under_entry_count_cap() {
        let mut cache = TextCache::new(TextCacheConfig { max_entries: 100, max_bytes: 10 });
        cache.put("a".into(), "12345".into());
        cache.put("b".into(), "67890".into());
        cache.put("c".into(), "abcde".into());
        assert!(cache.len() < 3);
    }

    #[test]
    fn oversized_single_entry_is_not_cached() {
        let mut cache = TextCache::new(TextCacheConfig { max_entries: 10, max_bytes: 4 });
        cache.put("a".into(), "waytoolarge".into());
        assert!(cache.get(&"a".to_string()).is_none());
    }
}
