//! In-process cache backend.
//!
//! An LRU map bounded by the total size of the cached image bytes. When an
//! insert pushes the total over capacity, least-recently-used entries are
//! dropped until it fits again.

use super::{Cache, CacheEntry, CacheStats};
use lru::LruCache;
use tokio::sync::Mutex;

struct Inner {
    entries: LruCache<String, CacheEntry>,
    current_size: u64,
}

pub struct MemoryCache {
    inner: Mutex<Inner>,
    max_size: u64,
}

impl MemoryCache {
    /// `max_size` is the byte budget for cached image data.
    pub fn with_capacity(max_size: u64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::unbounded(),
                current_size: 0,
            }),
            max_size,
        }
    }
}

#[async_trait::async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, String> {
        let mut inner = self.inner.lock().await;
        Ok(inner.entries.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), String> {
        let size = entry.bytes.len() as u64;
        let mut inner = self.inner.lock().await;

        if size > self.max_size {
            // the older entry for this key is stale now
            if let Some(old) = inner.entries.pop(key) {
                inner.current_size = inner.current_size.saturating_sub(old.bytes.len() as u64);
            }
            tracing::debug!("Not caching key={}: {} bytes exceeds capacity {}", key, size, self.max_size);
            return Ok(());
        }

        if let Some(old) = inner.entries.put(key.to_string(), entry) {
            inner.current_size = inner.current_size.saturating_sub(old.bytes.len() as u64);
        }
        inner.current_size += size;

        let mut evicted = 0usize;
        while inner.current_size > self.max_size {
            match inner.entries.pop_lru() {
                Some((_, old)) => {
                    inner.current_size = inner.current_size.saturating_sub(old.bytes.len() as u64);
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            tracing::debug!("Evicted {} entries, cache now {} bytes", evicted, inner.current_size);
        }
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            backend: "memory",
            entry_count: inner.entries.len(),
            total_size_bytes: inner.current_size,
            max_size_bytes: self.max_size,
        }
    }
}
