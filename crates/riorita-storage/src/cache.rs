//! In-memory LRU result cache placed in front of the storage backend.
//!
//! Repeated reads of hot keys are served from RAM without touching the
//! engine. The cache is bounded two ways: a per-entry cap (entries larger
//! than it are silently skipped, so one huge value cannot sweep the whole
//! cache) and a total byte budget enforced by least-recently-used
//! eviction. Key and value bytes both count toward the budget.
//!
//! Every operation takes a single lock for its whole duration and there
//! is no await point under the lock, so a plain mutex suffices.

use bytes::Bytes;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::trace;

/// Cache sizing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Largest admissible entry (key plus value bytes).
    pub max_entry_bytes: usize,

    /// Total byte budget across all entries.
    pub max_total_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entry_bytes: 16 * 1024 * 1024,
            max_total_bytes: 16 * 1024 * 1024 * 1024,
        }
    }
}

struct Inner {
    lru: LruCache<Bytes, Bytes>,
    bytes: usize,
}

/// Byte-budgeted LRU over `key -> value`.
pub struct ResultCache {
    max_entry_bytes: usize,
    max_total_bytes: usize,
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            max_entry_bytes: config.max_entry_bytes,
            max_total_bytes: config.max_total_bytes,
            inner: Mutex::new(Inner {
                lru: LruCache::unbounded(),
                bytes: 0,
            }),
        }
    }

    /// True iff the key is cached. Counts as an access.
    pub fn has(&self, key: &[u8]) -> bool {
        if key.len() > self.max_entry_bytes {
            return false;
        }
        self.inner.lock().unwrap().lru.get(key).is_some()
    }

    /// Returns the cached value and refreshes its recency.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        if key.len() > self.max_entry_bytes {
            return None;
        }
        self.inner.lock().unwrap().lru.get(key).cloned()
    }

    /// Inserts or replaces an entry, evicting the least recently used
    /// entries until the budget holds. Entries over the per-entry cap are
    /// skipped without touching the cache.
    pub fn put(&self, key: &[u8], value: Bytes) {
        let entry_bytes = key.len() + value.len();
        if entry_bytes > self.max_entry_bytes {
            trace!(size = entry_bytes, "value too large to cache, skipping");
            return;
        }

        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.lru.put(Bytes::copy_from_slice(key), value) {
            inner.bytes -= key.len() + old.len();
        }
        inner.bytes += entry_bytes;

        while inner.bytes > self.max_total_bytes {
            match inner.lru.pop_lru() {
                Some((k, v)) => {
                    inner.bytes -= k.len() + v.len();
                    trace!(evicted = k.len() + v.len(), "cache entry evicted");
                }
                None => break,
            }
        }
    }

    /// Drops an entry if present. Does not touch recency of others.
    pub fn erase(&self, key: &[u8]) {
        if key.len() > self.max_entry_bytes {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if let Some(value) = inner.lru.pop(key) {
            inner.bytes -= key.len() + value.len();
        }
    }

    /// Current number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current total of key and value bytes held.
    pub fn bytes(&self) -> usize {
        self.inner.lock().unwrap().bytes
    }
}
