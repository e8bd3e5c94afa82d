//! Bounded LRU caches for metadata entries and data blobs.
//!
//! Backed by `lru::LruCache` (hash index over an intrusive doubly-linked
//! list), so get, set and eviction are O(1). `invalidate_by_parent` is a scan
//! and only runs after structural mutations.

use lru::LruCache;
use std::num::NonZeroUsize;

use crate::types::MetaEntry;

/// Default capacity of the metadata cache.
pub const METADATA_CACHE_CAPACITY: usize = 1000;
/// Default capacity of the data blob cache.
pub const DATA_CACHE_CAPACITY: usize = 10;

/// Values that know which directory they belong to.
pub trait ParentKeyed {
    /// Path of the containing directory.
    fn parent(&self) -> &str;
}

impl ParentKeyed for MetaEntry {
    fn parent(&self) -> &str {
        &self.parent
    }
}

/// Hit/miss/eviction counters for one cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through to the store.
    pub misses: u64,
    /// Entries dropped to stay within capacity.
    pub evictions: u64,
    /// Current number of entries.
    pub size: usize,
}

/// Path-keyed cache that drops the least-recently-used entry when full.
pub struct BoundedCache<V> {
    entries: LruCache<String, V>,
    stats: CacheStats,
}

impl<V: Clone> BoundedCache<V> {
    /// Creates a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    /// Returns a copy of the cached value and marks it most recently used.
    pub fn get(&mut self, key: &str) -> Option<V> {
        match self.entries.get(key) {
            Some(v) => {
                self.stats.hits += 1;
                Some(v.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts or replaces `key`, placing it at the most-recently-used end.
    pub fn set(&mut self, key: String, value: V) {
        if let Some((old_key, _)) = self.entries.push(key.clone(), value) {
            if old_key != key {
                self.stats.evictions += 1;
            }
        }
    }

    /// Removes `key` if present.
    pub fn delete(&mut self, key: &str) {
        self.entries.pop(key);
    }

    /// Returns true if `key` is cached, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            ..self.stats
        }
    }
}

impl<V: Clone + ParentKeyed> BoundedCache<V> {
    /// Removes every entry whose value's parent is `parent`.
    /// Returns the number of entries removed.
    pub fn invalidate_by_parent(&mut self, parent: &str) -> usize {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, v)| v.parent() == parent)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &keys {
            self.entries.pop(key.as_str());
        }
        keys.len()
    }
}
