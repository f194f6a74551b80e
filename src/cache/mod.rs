pub mod control;
pub mod key;
pub mod memory;
pub mod sled_cache;

pub use control::CacheControl;
pub use key::{derive_key, etag_for_key, AUTO};
pub use memory::MemoryCache;
pub use sled_cache::SledCache;

use crate::config::{CacheBackend, ProxyConfig};
use crate::metrics::METRICS;
use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A transcoded image as stored in the cache.
///
/// `content_type` always describes the encoding of `bytes`. Entries are
/// write-once per key: a later `put` replaces the whole entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub content_type: String,
    pub bytes: Bytes,
}

/// Statistics about a cache backend
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub backend: &'static str,
    pub entry_count: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
}

/// Trait for cache backends
///
/// Backends report their own failures; [`CacheStore`] decides what a failure
/// means for the request.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
    /// Get a cached entry by key
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, String>;

    /// Store an entry, replacing any previous one for the key
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), String>;

    async fn stats(&self) -> CacheStats;

    /// Persist anything buffered. Called once on shutdown.
    async fn flush(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The cache as the request handler sees it.
///
/// Fails open in both directions: a backend read error is a miss and a
/// backend write error is dropped after being logged and counted. Cloning
/// is cheap and every clone shares the same backend.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn Cache>,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn Cache>) -> Self {
        Self { backend }
    }

    /// Builds the backend selected in the config. Opening the sled database
    /// is the only step that can fail.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, String> {
        let backend: Arc<dyn Cache> = match config.cache_backend {
            CacheBackend::Memory => Arc::new(MemoryCache::with_capacity(config.max_cache_size)),
            CacheBackend::Sled => Arc::new(SledCache::new(&config.cache_dir, Some(config.max_cache_size))?),
        };
        tracing::info!(
            "Cache store ready: backend={}, max_size={} bytes",
            config.cache_backend, config.max_cache_size
        );
        Ok(Self::new(backend))
    }

    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        match self.backend.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Cache read failed for key={}, treating as miss: {}", key, e);
                METRICS.cache_errors.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, key: &str, entry: CacheEntry) {
        if let Err(e) = self.backend.put(key, entry).await {
            tracing::warn!("Failed to cache transformed image for key={}: {}", key, e);
            METRICS.cache_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub async fn stats(&self) -> CacheStats {
        self.backend.stats().await
    }

    pub async fn shutdown(&self) {
        match self.backend.flush().await {
            Ok(()) => tracing::info!("Cache store flushed"),
            Err(e) => tracing::warn!("Cache flush on shutdown failed: {}", e),
        }
    }
}
