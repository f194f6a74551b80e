use crate::cache::{Cache, CacheEntry, CacheStats};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metadata stored alongside cached images
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CacheMetadata {
    pub key: String,
    pub content_type: String,
    pub size: usize,
    pub created_at: u64,
    pub accessed_at: u64,
}

/// Sled-based cache with LRU eviction
///
/// Survives restarts. Each entry is two records, `meta:{key}` holding
/// [`CacheMetadata`] as JSON and `data:{key}` holding the image bytes.
/// When the stored bytes exceed `max_size`, the least recently accessed
/// entries are removed until usage is back under 90% of the limit.
pub struct SledCache {
    db: Db,
    max_size: u64,
    current_size: AtomicU64,
}

impl SledCache {
    /// Open (or create) the database at `path`.
    ///
    /// `max_size` defaults to [`crate::config::DEFAULT_MAX_CACHE_SIZE`].
    pub fn new(path: impl AsRef<Path>, max_size: Option<u64>) -> Result<Self, String> {
        let db = sled::open(path).map_err(|e| format!("Failed to open Sled database: {}", e))?;
        Ok(Self::from_db(db, max_size))
    }

    /// Wrap an already-open database, e.g. a temporary one.
    pub fn from_db(db: Db, max_size: Option<u64>) -> Self {
        let cache = Self {
            db,
            max_size: max_size.unwrap_or(crate::config::DEFAULT_MAX_CACHE_SIZE),
            current_size: AtomicU64::new(0),
        };
        let existing: u64 = cache.all_metadata().iter().map(|m| m.size as u64).sum();
        cache.current_size.store(existing, Ordering::Relaxed);
        cache
    }

    fn metadata_key(key: &str) -> String {
        format!("meta:{}", key)
    }

    fn data_key(key: &str) -> String {
        format!("data:{}", key)
    }

    fn all_metadata(&self) -> Vec<CacheMetadata> {
        self.db
            .scan_prefix(b"meta:")
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<CacheMetadata>(&value).ok())
            .collect()
    }

    /// Evict least recently used entries until under size limit
    fn evict_if_needed(&self) -> Result<(), String> {
        let current = self.current_size.load(Ordering::Relaxed);
        if current <= self.max_size {
            return Ok(());
        }

        tracing::info!("Cache size {} exceeds limit {}, starting eviction", current, self.max_size);

        let mut entries = self.all_metadata();
        entries.sort_by_key(|e| e.accessed_at);

        let target_to_free = current.saturating_sub(self.max_size * 90 / 100);
        let mut freed = 0u64;
        let mut evicted_count = 0;

        for entry in entries {
            if freed >= target_to_free {
                break;
            }
            self.db.remove(Self::metadata_key(&entry.key).as_bytes())
                .map_err(|e| e.to_string())?;
            if let Some(old) = self.db.remove(Self::data_key(&entry.key).as_bytes())
                .map_err(|e| e.to_string())?
            {
                self.current_size.fetch_sub(old.len() as u64, Ordering::Relaxed);
                freed += old.len() as u64;
            }
            evicted_count += 1;

            tracing::debug!("Evicted cache entry: key={}, size={}", entry.key, entry.size);
        }

        tracing::info!("Eviction complete: freed {} bytes by removing {} entries", freed, evicted_count);
        Ok(())
    }
}

fn now_micros() -> u64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as u64
}

#[async_trait::async_trait]
impl Cache for SledCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, String> {
        let meta_key = Self::metadata_key(key);

        let mut meta = match self.db.get(meta_key.as_bytes()).map_err(|e| e.to_string())? {
            Some(m) => serde_json::from_slice::<CacheMetadata>(&m).map_err(|e| e.to_string())?,
            None => return Ok(None),
        };

        let data = match self.db.get(Self::data_key(key).as_bytes()).map_err(|e| e.to_string())? {
            Some(d) => Bytes::copy_from_slice(&d),
            None => return Ok(None),
        };

        // Update access time (cache hit); losing this write only skews LRU order
        meta.accessed_at = now_micros();
        if let Ok(encoded) = serde_json::to_vec(&meta) {
            let _ = self.db.insert(meta_key.as_bytes(), encoded);
        }

        Ok(Some(CacheEntry { content_type: meta.content_type, bytes: data }))
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), String> {
        let now = now_micros();
        let metadata = CacheMetadata {
            key: key.to_string(),
            content_type: entry.content_type,
            size: entry.bytes.len(),
            created_at: now,
            accessed_at: now,
        };
        let encoded = serde_json::to_vec(&metadata).map_err(|e| e.to_string())?;

        let old = self.db
            .insert(Self::data_key(key).as_bytes(), entry.bytes.as_ref())
            .map_err(|e| format!("Failed to write cache data: {}", e))?;
        self.db
            .insert(Self::metadata_key(key).as_bytes(), encoded)
            .map_err(|e| format!("Failed to write cache metadata: {}", e))?;

        if let Some(old) = old {
            self.current_size.fetch_sub(old.len() as u64, Ordering::Relaxed);
        }
        self.current_size.fetch_add(metadata.size as u64, Ordering::Relaxed);

        self.evict_if_needed()
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            backend: "sled",
            entry_count: self.db.scan_prefix(b"meta:").count(),
            total_size_bytes: self.current_size.load(Ordering::Relaxed),
            max_size_bytes: self.max_size,
        }
    }

    async fn flush(&self) -> Result<(), String> {
        self.db.flush_async().await.map(|_| ()).map_err(|e| e.to_string())
    }
}
