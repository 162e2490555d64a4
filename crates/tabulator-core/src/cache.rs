//! Bounded cache for deserialized values.

use crate::value::Value;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Default number of deserialized values kept.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Hit/miss counters of an [`ObjectCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

struct CacheInner {
    /// `None` when caching is disabled.
    entries: Option<LruCache<(String, Value), Value>>,
    hits: u64,
    misses: u64,
}

/// Least-recently-used cache from `(concept, raw identifier)` to a
/// deserialized value.
///
/// A capacity of zero disables caching.
pub struct ObjectCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl ObjectCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner {
                entries: NonZeroUsize::new(capacity).map(LruCache::new),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the cached value, or compute, store and return it.
    pub fn get_or_insert_with(
        &self,
        concept: &str,
        raw: &Value,
        compute: impl FnOnce() -> Value,
    ) -> Value {
        if self.capacity == 0 {
            return compute();
        }

        let key = (concept.to_string(), raw.clone());
        {
            let mut inner = self.lock();
            let hit = inner.entries.as_mut().and_then(|e| e.get(&key).cloned());
            if let Some(value) = hit {
                inner.hits += 1;
                return value;
            }
            inner.misses += 1;
        }

        // Computed outside the lock; deserialization may be slow.
        let value = compute();

        if let Some(entries) = self.lock().entries.as_mut() {
            entries.put(key, value.clone());
        }
        value
    }

    pub fn clear(&self) {
        if let Some(entries) = self.lock().entries.as_mut() {
            entries.clear();
        }
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            len: inner.entries.as_ref().map_or(0, LruCache::len),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        // A poisoned cache only ever holds complete entries.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for ObjectCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
