//! Two-tier cache implementation

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{cache_key, CacheConfig, CacheKind, CacheStats, RemoteKv};

/// A framed cache value: first byte marks the encoding
const FRAME_RAW: u8 = 0;
const FRAME_LZ4: u8 = 1;

struct Entry {
    bytes: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|e| e <= Instant::now()).unwrap_or(false)
    }
}

/// Tier-1 storage: one LRU for the vector-search view, TTL maps for the rest
struct Tier1 {
    lru: Mutex<LruCache<String, Entry>>,
    ttl_maps: [Mutex<HashMap<String, Entry>>; 3],
}

impl Tier1 {
    fn new(lru_capacity: usize) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(
                NonZeroUsize::new(lru_capacity.max(1)).expect("capacity is at least 1"),
            )),
            ttl_maps: [
                Mutex::new(HashMap::new()),
                Mutex::new(HashMap::new()),
                Mutex::new(HashMap::new()),
            ],
        }
    }

    fn ttl_slot(kind: CacheKind) -> Option<usize> {
        match kind {
            CacheKind::Embedding => Some(0),
            CacheKind::ModelResponse => Some(1),
            CacheKind::Conversation => Some(2),
            CacheKind::VectorSearch => None,
        }
    }

    fn get(&self, kind: CacheKind, key: &str) -> Option<Vec<u8>> {
        match Self::ttl_slot(kind) {
            None => {
                let mut lru = self.lru.lock().expect("lru lock");
                let expired = lru.get(key).map(|entry| entry.is_expired())?;
                if expired {
                    lru.pop(key);
                    return None;
                }
                lru.get(key).map(|entry| entry.bytes.clone())
            }
            Some(slot) => {
                let mut map = self.ttl_maps[slot].lock().expect("ttl lock");
                let expired = map.get(key).map(|entry| entry.is_expired())?;
                if expired {
                    map.remove(key);
                    return None;
                }
                map.get(key).map(|entry| entry.bytes.clone())
            }
        }
    }

    fn set(&self, kind: CacheKind, key: String, bytes: Vec<u8>, ttl: Duration) {
        let entry = Entry {
            bytes,
            expires_at: Some(Instant::now() + ttl),
        };
        match Self::ttl_slot(kind) {
            None => {
                self.lru.lock().expect("lru lock").put(key, entry);
            }
            Some(slot) => {
                let mut map = self.ttl_maps[slot].lock().expect("ttl lock");
                // Opportunistic sweep keeps TTL maps from accumulating
                // dead entries between hits.
                if map.len() % 64 == 0 {
                    map.retain(|_, e| !e.is_expired());
                }
                map.insert(key, entry);
            }
        }
    }

    fn remove_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        {
            let mut lru = self.lru.lock().expect("lru lock");
            let doomed: Vec<String> = lru
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect();
            removed += doomed.len();
            for k in doomed {
                lru.pop(&k);
            }
        }
        for map in &self.ttl_maps {
            let mut map = map.lock().expect("ttl lock");
            let before = map.len();
            map.retain(|k, _| !k.starts_with(prefix));
            removed += before - map.len();
        }
        removed
    }

    fn view_size(&self, kind: CacheKind) -> usize {
        match Self::ttl_slot(kind) {
            None => self.lru.lock().expect("lru lock").len(),
            Some(slot) => self.ttl_maps[slot].lock().expect("ttl lock").len(),
        }
    }
}

// ============================================================================
// TIERED CACHE
// ============================================================================

/// Two-tier cache with typed views, compression, and batch operations
pub struct TieredCache {
    tier1: Tier1,
    remote: Option<Arc<dyn RemoteKv>>,
    config: CacheConfig,
    tier1_hits: AtomicU64,
    tier2_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
}

impl TieredCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            tier1: Tier1::new(config.lru_capacity),
            remote: None,
            config,
            tier1_hits: AtomicU64::new(0),
            tier2_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }

    pub fn with_remote(config: CacheConfig, remote: Arc<dyn RemoteKv>) -> Self {
        let mut cache = Self::new(config);
        cache.remote = Some(remote);
        cache
    }

    fn encode(&self, bytes: &[u8]) -> Vec<u8> {
        if bytes.len() > self.config.compress_threshold {
            let mut framed = vec![FRAME_LZ4];
            framed.extend(lz4_flex::compress_prepend_size(bytes));
            framed
        } else {
            let mut framed = vec![FRAME_RAW];
            framed.extend_from_slice(bytes);
            framed
        }
    }

    fn decode(framed: &[u8]) -> Option<Vec<u8>> {
        match framed.split_first() {
            Some((&FRAME_RAW, rest)) => Some(rest.to_vec()),
            Some((&FRAME_LZ4, rest)) => lz4_flex::decompress_size_prepended(rest).ok(),
            _ => None,
        }
    }

    /// Get the raw value stored under `input` in a view
    pub async fn get_bytes(&self, kind: CacheKind, input: &str) -> Option<Vec<u8>> {
        let key = cache_key(kind, input);

        if let Some(framed) = self.tier1.get(kind, &key) {
            self.tier1_hits.fetch_add(1, Ordering::Relaxed);
            return Self::decode(&framed);
        }

        if let Some(remote) = &self.remote {
            if let Ok(Some(framed)) = remote.get(&key).await {
                self.tier2_hits.fetch_add(1, Ordering::Relaxed);
                // Promote into Tier 1 at the view's default TTL
                self.tier1.set(kind, key, framed.clone(), kind.default_ttl());
                return Self::decode(&framed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a raw value; `ttl` of `None` means the view default
    pub async fn set_bytes(&self, kind: CacheKind, input: &str, bytes: &[u8], ttl: Option<Duration>) {
        let key = cache_key(kind, input);
        let ttl = ttl.unwrap_or_else(|| kind.default_ttl());
        let framed = self.encode(bytes);
        self.sets.fetch_add(1, Ordering::Relaxed);

        self.tier1.set(kind, key.clone(), framed.clone(), ttl);
        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set(&key, framed, Some(ttl)).await {
                tracing::warn!("Tier-2 cache write failed: {}", e);
            }
        }
    }

    /// Typed helpers -----------------------------------------------------

    pub async fn get_json<T: DeserializeOwned>(&self, kind: CacheKind, input: &str) -> Option<T> {
        let bytes = self.get_bytes(kind, input).await?;
        serde_json::from_slice(&bytes).ok()
    }

    pub async fn set_json<T: Serialize>(
        &self,
        kind: CacheKind,
        input: &str,
        value: &T,
        ttl: Option<Duration>,
    ) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set_bytes(kind, input, &bytes, ttl).await,
            Err(e) => tracing::warn!("Cache serialization failed: {}", e),
        }
    }

    /// Float vectors use postcard: half the size of the JSON rendering
    pub async fn get_vector(&self, input: &str) -> Option<Vec<f32>> {
        let bytes = self.get_bytes(CacheKind::Embedding, input).await?;
        postcard::from_bytes(&bytes).ok()
    }

    pub async fn set_vector(&self, input: &str, vector: &[f32], ttl: Option<Duration>) {
        match postcard::to_allocvec(vector) {
            Ok(bytes) => self.set_bytes(CacheKind::Embedding, input, &bytes, ttl).await,
            Err(e) => tracing::warn!("Vector cache serialization failed: {}", e),
        }
    }

    /// Batch operations ---------------------------------------------------
    /// Equivalent to the sequential loop, kept as one call so batch users
    /// get one stats bump per element and future backends can pipeline.

    pub async fn get_batch(&self, kind: CacheKind, inputs: &[&str]) -> Vec<Option<Vec<u8>>> {
        let mut out = Vec::with_capacity(inputs.len());
        for input in inputs {
            out.push(self.get_bytes(kind, input).await);
        }
        out
    }

    pub async fn set_batch(
        &self,
        kind: CacheKind,
        entries: &[(&str, Vec<u8>)],
        ttl: Option<Duration>,
    ) {
        for (input, bytes) in entries {
            self.set_bytes(kind, input, bytes, ttl).await;
        }
    }

    /// Invalidate a view (`"emb:*"`), or every view (`"*"`)
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let prefix = pattern.trim_end_matches('*');
        let mut removed = self.tier1.remove_prefix(prefix);
        if let Some(remote) = &self.remote {
            if let Ok(n) = remote.remove_prefix(prefix).await {
                removed += n;
            }
        }
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let view_sizes = CacheKind::ALL
            .iter()
            .map(|k| (k.prefix(), self.tier1.view_size(*k)))
            .collect();
        CacheStats {
            tier1_hits: self.tier1_hits.load(Ordering::Relaxed),
            tier2_hits: self.tier2_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            view_sizes,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryKv;

    fn cache() -> TieredCache {
        TieredCache::new(CacheConfig::default())
    }

    #[tokio::test]
    async fn test_get_returns_most_recent_set() {
        let c = cache();
        c.set_bytes(CacheKind::Embedding, "text", b"one", None).await;
        c.set_bytes(CacheKind::Embedding, "text", b"two", None).await;
        assert_eq!(
            c.get_bytes(CacheKind::Embedding, "text").await,
            Some(b"two".to_vec())
        );
    }

    #[tokio::test]
    async fn test_miss_then_hit_stats() {
        let c = cache();
        assert!(c.get_bytes(CacheKind::Embedding, "x").await.is_none());
        c.set_bytes(CacheKind::Embedding, "x", b"v", None).await;
        assert!(c.get_bytes(CacheKind::Embedding, "x").await.is_some());

        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.tier1_hits, 1);
        assert!((stats.hit_rate() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_large_values_roundtrip_through_compression() {
        let c = cache();
        let big = vec![42u8; 8 * 1024];
        c.set_bytes(CacheKind::ModelResponse, "prompt", &big, None).await;
        assert_eq!(
            c.get_bytes(CacheKind::ModelResponse, "prompt").await,
            Some(big)
        );
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let c = cache();
        c.set_bytes(CacheKind::Embedding, "x", b"v", Some(Duration::from_millis(10)))
            .await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(c.get_bytes(CacheKind::Embedding, "x").await.is_none());
    }

    #[tokio::test]
    async fn test_tier2_promotion() {
        let remote = Arc::new(InMemoryKv::new());
        let c = TieredCache::with_remote(CacheConfig::default(), remote.clone());

        c.set_bytes(CacheKind::Conversation, "s1", b"turns", None).await;
        // Wipe Tier 1, value must come back from Tier 2
        c.tier1.remove_prefix("conv:");
        assert_eq!(
            c.get_bytes(CacheKind::Conversation, "s1").await,
            Some(b"turns".to_vec())
        );
        assert_eq!(c.stats().tier2_hits, 1);
        // And now it is promoted
        assert_eq!(
            c.get_bytes(CacheKind::Conversation, "s1").await,
            Some(b"turns".to_vec())
        );
        assert_eq!(c.stats().tier1_hits, 1);
    }

    #[tokio::test]
    async fn test_batch_ops_match_sequential() {
        let c = cache();
        c.set_batch(
            CacheKind::Embedding,
            &[("a", b"1".to_vec()), ("b", b"2".to_vec())],
            None,
        )
        .await;
        let got = c.get_batch(CacheKind::Embedding, &["a", "b", "c"]).await;
        assert_eq!(got[0], Some(b"1".to_vec()));
        assert_eq!(got[1], Some(b"2".to_vec()));
        assert_eq!(got[2], None);
    }

    #[tokio::test]
    async fn test_invalidate_pattern_only_hits_view() {
        let c = cache();
        c.set_bytes(CacheKind::Embedding, "a", b"1", None).await;
        c.set_bytes(CacheKind::VectorSearch, "a", b"2", None).await;

        let removed = c.invalidate("emb:*").await;
        assert_eq!(removed, 1);
        assert!(c.get_bytes(CacheKind::Embedding, "a").await.is_none());
        assert!(c.get_bytes(CacheKind::VectorSearch, "a").await.is_some());
    }

    #[tokio::test]
    async fn test_vector_roundtrip() {
        let c = cache();
        let v = vec![0.25_f32, -0.5, 1.0];
        c.set_vector("text", &v, None).await;
        assert_eq!(c.get_vector("text").await, Some(v));
    }
}
