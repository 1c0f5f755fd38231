//! In-process store implementations.
//!
//! Used by the `serve` command when no external backend is configured and by
//! the test suites. Each store counts its reads and writes and can be switched
//! into an unavailable state to exercise the miss-on-error policy.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::stream;
use lru::LruCache;
use time::OffsetDateTime;
use tokio::time::Instant;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};
use super::store::{
    CachedResponse, KvStore, ObjectRecord, ObjectStore, ResponseStore, StoreError,
};

const RESPONSE_STORE: &str = "response";
const KV_STORE: &str = "kv";
const OBJECT_STORE: &str = "object";

/// Read/write counters for a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicBool,
}

impl Counters {
    fn read(&self, store: &'static str) -> Result<(), StoreError> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.check(store)
    }

    fn write(&self, store: &'static str) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.check(store)
    }

    fn check(&self, store: &'static str) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::unavailable(store, "backend switched off"));
        }
        Ok(())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Response store
// ============================================================================

struct ResponseSlot {
    response: CachedResponse,
    expires_at: Instant,
}

/// LRU-bounded response cache with per-entry expiry.
pub struct MemoryResponseStore {
    entries: RwLock<LruCache<CacheKey, ResponseSlot>>,
    counters: Counters,
}

impl MemoryResponseStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.response_limit_non_zero())),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.stats()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.counters.unavailable.store(unavailable, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, RESPONSE_STORE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResponseStore for MemoryResponseStore {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<CachedResponse>, StoreError> {
        self.counters.read(RESPONSE_STORE)?;
        let mut entries = rw_write(&self.entries, RESPONSE_STORE, "lookup");

        let expired = match entries.get(key) {
            Some(slot) if Instant::now() < slot.expires_at => {
                return Ok(Some(slot.response.clone()));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        Ok(None)
    }

    async fn put(&self, key: CacheKey, response: CachedResponse) -> Result<(), StoreError> {
        self.counters.write(RESPONSE_STORE)?;
        let expires_at = Instant::now() + response.ttl;
        rw_write(&self.entries, RESPONSE_STORE, "put").put(
            key,
            ResponseSlot {
                response,
                expires_at,
            },
        );
        Ok(())
    }

    async fn evict_except(&self, generation_id: u64) -> Result<usize, StoreError> {
        self.counters.check(RESPONSE_STORE)?;
        let mut entries = rw_write(&self.entries, RESPONSE_STORE, "evict_except");
        let stale: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, slot)| slot.response.generation_id != generation_id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        Ok(stale.len())
    }
}

// ============================================================================
// KV store
// ============================================================================

#[derive(Debug, Clone)]
struct KvEntry {
    value: String,
    ttl_seconds: u64,
    stored_at: OffsetDateTime,
    expires_at: Instant,
}

/// Concurrent KV store; expiry is applied lazily on read.
pub struct MemoryKvStore {
    entries: DashMap<String, KvEntry>,
    limit: usize,
    counters: Counters,
}

impl MemoryKvStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            limit: config.kv_limit_non_zero().get(),
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.stats()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.counters.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// TTL and storage time of a live entry.
    pub fn metadata(&self, key: &str) -> Option<(u64, OffsetDateTime)> {
        self.entries
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| (entry.ttl_seconds, entry.stored_at))
    }

    fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| now < entry.expires_at);
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.counters.read(KV_STORE)?;
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if now < entry.expires_at {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| now >= entry.expires_at);
        Ok(None)
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.counters.write(KV_STORE)?;
        let ttl_seconds = ttl.as_secs();
        if ttl_seconds == 0 {
            return Err(StoreError::InvalidTtl);
        }

        if !self.entries.contains_key(key) && self.entries.len() >= self.limit {
            self.purge_expired();
            if self.entries.len() >= self.limit {
                return Err(StoreError::Full { store: KV_STORE });
            }
        }

        self.entries.insert(
            key.to_string(),
            KvEntry {
                value,
                ttl_seconds,
                stored_at: OffsetDateTime::now_utc(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.counters.write(KV_STORE)?;
        self.entries.remove(key);
        Ok(())
    }
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Clone)]
struct StoredObject {
    content_type: Option<String>,
    body: Bytes,
}

/// Blob store held in memory. Bodies are streamed back in fixed-size chunks.
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, StoredObject>>,
    chunk_size: usize,
    counters: Counters,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            chunk_size: 64 * 1024,
            counters: Counters::default(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.counters.stats()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.counters.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, object_key: &str) -> Result<Option<ObjectRecord>, StoreError> {
        self.counters.read(OBJECT_STORE)?;
        let Some(object) = rw_read(&self.objects, OBJECT_STORE, "get")
            .get(object_key)
            .cloned()
        else {
            return Ok(None);
        };

        let size = object.body.len() as u64;
        let chunks: Vec<Result<Bytes, std::io::Error>> = object
            .body
            .chunks(self.chunk_size)
            .map(|chunk| Ok(object.body.slice_ref(chunk)))
            .collect();

        Ok(Some(ObjectRecord {
            object_key: object_key.to_string(),
            content_type: object.content_type,
            size,
            body: Box::pin(stream::iter(chunks)),
        }))
    }

    async fn put(
        &self,
        object_key: &str,
        content_type: Option<String>,
        body: Bytes,
    ) -> Result<(), StoreError> {
        self.counters.write(OBJECT_STORE)?;
        rw_write(&self.objects, OBJECT_STORE, "put").insert(
            object_key.to_string(),
            StoredObject { content_type, body },
        );
        Ok(())
    }

    async fn delete(&self, object_key: &str) -> Result<(), StoreError> {
        self.counters.write(OBJECT_STORE)?;
        rw_write(&self.objects, OBJECT_STORE, "delete").remove(object_key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use futures::TryStreamExt;

    use super::*;

    fn key(path: &str) -> CacheKey {
        let uri: Uri = path.parse().unwrap();
        CacheKey::from_parts(&Method::GET, &uri, &HeaderMap::new(), &[])
    }

    fn response(body: &'static str, ttl: Duration, generation_id: u64) -> CachedResponse {
        CachedResponse::new(
            StatusCode::OK,
            &HeaderMap::new(),
            Bytes::from_static(body.as_bytes()),
            ttl,
            generation_id,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn response_entry_expires_after_ttl() {
        let store = MemoryResponseStore::new(&CacheConfig::default());
        store
            .put(key("/"), response("home", Duration::from_secs(3600), 1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(store.lookup(&key("/")).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.lookup(&key("/")).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn response_store_evicts_other_generations() {
        let store = MemoryResponseStore::new(&CacheConfig::default());
        let ttl = Duration::from_secs(60);
        store.put(key("/a.js"), response("a", ttl, 1)).await.unwrap();
        store.put(key("/b.js"), response("b", ttl, 2)).await.unwrap();

        assert_eq!(store.evict_except(2).await.unwrap(), 1);
        assert!(store.lookup(&key("/a.js")).await.unwrap().is_none());
        assert!(store.lookup(&key("/b.js")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn response_store_lru_eviction() {
        let config = CacheConfig {
            response_limit: 1,
            ..Default::default()
        };
        let store = MemoryResponseStore::new(&config);
        let ttl = Duration::from_secs(60);
        store.put(key("/a.js"), response("a", ttl, 1)).await.unwrap();
        store.put(key("/b.js"), response("b", ttl, 1)).await.unwrap();

        assert!(store.lookup(&key("/a.js")).await.unwrap().is_none());
        assert!(store.lookup(&key("/b.js")).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn kv_entry_past_ttl_is_a_miss() {
        let store = MemoryKvStore::new(&CacheConfig::default());
        store
            .put("api:/api/health:", "{\"ok\":true}".into(), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(store.metadata("api:/api/health:").map(|(ttl, _)| ttl), Some(300));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(store.get("api:/api/health:").await.unwrap(), None);
        assert!(store.metadata("api:/api/health:").is_none());
    }

    #[tokio::test]
    async fn kv_rejects_zero_ttl() {
        let store = MemoryKvStore::new(&CacheConfig::default());
        let err = store
            .put("k", "v".into(), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTtl));
    }

    #[tokio::test]
    async fn kv_full_store_rejects_new_keys_but_replaces_existing() {
        let config = CacheConfig {
            kv_limit: 1,
            ..Default::default()
        };
        let store = MemoryKvStore::new(&config);
        let ttl = Duration::from_secs(60);
        store.put("a", "1".into(), ttl).await.unwrap();
        assert!(matches!(
            store.put("b", "2".into(), ttl).await,
            Err(StoreError::Full { .. })
        ));
        store.put("a", "3".into(), ttl).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn unavailable_store_reports_errors() {
        let store = MemoryKvStore::new(&CacheConfig::default());
        store.set_unavailable(true);
        assert!(matches!(
            store.get("a").await,
            Err(StoreError::Unavailable { .. })
        ));
        assert_eq!(store.stats(), StoreStats { reads: 1, writes: 0 });
    }

    #[tokio::test]
    async fn object_store_streams_body_in_chunks() {
        let mut store = MemoryObjectStore::new();
        store.chunk_size = 4;
        store
            .put(
                "reports/q1.pdf",
                Some("application/pdf".into()),
                Bytes::from_static(b"0123456789"),
            )
            .await
            .unwrap();

        let record = store.get("reports/q1.pdf").await.unwrap().expect("object");
        assert_eq!(record.size, 10);
        assert_eq!(record.content_type.as_deref(), Some("application/pdf"));
        let chunks: Vec<Bytes> = record.body.try_collect().await.unwrap();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), b"0123456789".to_vec());

        store.delete("reports/q1.pdf").await.unwrap();
        assert!(store.get("reports/q1.pdf").await.unwrap().is_none());
    }
}
