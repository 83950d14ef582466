//! Remote KV tier
//!
//! Tier 2 of the cache layer. Production deployments point this at a
//! networked KV store; [`InMemoryKv`] is the in-process stand-in used in
//! tests and single-node setups.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;

/// Remote key-value store contract (Tier 2)
#[async_trait]
pub trait RemoteKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove every key starting with `prefix`; returns how many were dropped
    async fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

/// In-process Tier-2 double with real TTL semantics
#[derive(Default)]
pub struct InMemoryKv {
    entries: tokio::sync::Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl InMemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RemoteKv for InMemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().await;
        let expired = match entries.get(key) {
            Some((_, Some(expiry))) => *expiry <= Instant::now(),
            Some((_, None)) => false,
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let expiry = ttl.map(|t| Instant::now() + t);
        self.entries.lock().await.insert(key.to_string(), (value, expiry));
        Ok(())
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let kv = InMemoryKv::new();
        kv.set("k", b"value".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let kv = InMemoryKv::new();
        kv.set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_prefix() {
        let kv = InMemoryKv::new();
        kv.set("emb:a", b"1".to_vec(), None).await.unwrap();
        kv.set("emb:b", b"2".to_vec(), None).await.unwrap();
        kv.set("vec:c", b"3".to_vec(), None).await.unwrap();

        let removed = kv.remove_prefix("emb:").await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(kv.len().await, 1);
    }
}
