//! Cached, batched embedding front
//!
//! Sits between the engine and whichever [`EmbeddingProvider`] is
//! configured. Look-ups go through the embedding cache view first; misses
//! are grouped into provider batches. Model inference is CPU-bound, so
//! provider calls run on the blocking pool.

use std::sync::Arc;

use crate::cache::TieredCache;
use crate::error::{CoreError, Result};

use super::{EmbeddingProvider, BATCH_SIZE};

/// Embedding pipeline: cache -> batch -> provider
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<TieredCache>,
    batch_size: usize,
}

impl EmbeddingPipeline {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache: Arc<TieredCache>) -> Self {
        Self {
            provider,
            cache,
            batch_size: BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Output dimensionality of the configured provider
    pub fn dim(&self) -> usize {
        self.provider.dim()
    }

    /// Provider model name
    pub fn model_name(&self) -> String {
        self.provider.name().to_string()
    }

    /// Embed one text, consulting the cache first
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(vector) = self.cache.get_vector(text).await {
            return Ok(vector);
        }

        let provider = Arc::clone(&self.provider);
        let owned = text.to_string();
        let vector = tokio::task::spawn_blocking(move || provider.embed(&owned))
            .await
            .map_err(|e| CoreError::Internal(format!("embed task panicked: {e}")))?
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

        self.cache.set_vector(text, &vector, None).await;
        Ok(vector)
    }

    /// Embed many texts. Cache hits are served directly; misses are
    /// dispatched to the provider in batches of `batch_size`, preserving
    /// input order in the result.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut miss_indexes = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            match self.cache.get_vector(text).await {
                Some(vector) => out[i] = Some(vector),
                None => miss_indexes.push(i),
            }
        }

        for chunk in miss_indexes.chunks(self.batch_size) {
            let provider = Arc::clone(&self.provider);
            let batch: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let vectors = tokio::task::spawn_blocking(move || {
                let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
                provider.embed_batch(&refs)
            })
            .await
            .map_err(|e| CoreError::Internal(format!("embed task panicked: {e}")))?
            .map_err(|e| CoreError::ProviderUnavailable(e.to_string()))?;

            if vectors.len() != chunk.len() {
                return Err(CoreError::ProviderUnavailable(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    chunk.len()
                )));
            }

            for (&i, vector) in chunk.iter().zip(vectors) {
                self.cache.set_vector(&texts[i], &vector, None).await;
                out[i] = Some(vector);
            }

            // Let queued tasks run between CPU-heavy batches
            tokio::task::yield_now().await;
        }

        Ok(out
            .into_iter()
            .map(|v| v.expect("every index filled from cache or provider"))
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::embedding::{EmbeddingError, HashProjectionModel};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that counts calls and can be switched into a failing mode
    struct FlakyProvider {
        inner: HashProjectionModel,
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl FlakyProvider {
        fn new() -> Self {
            Self {
                inner: HashProjectionModel::default(),
                calls: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl EmbeddingProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }
        fn dim(&self) -> usize {
            self.inner.dim()
        }
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(EmbeddingError::Failed("backend down".into()));
            }
            self.inner.embed(text)
        }
    }

    fn pipeline(provider: Arc<FlakyProvider>) -> EmbeddingPipeline {
        EmbeddingPipeline::new(provider, Arc::new(TieredCache::new(CacheConfig::default())))
    }

    #[tokio::test]
    async fn test_cache_short_circuits_provider() {
        let provider = Arc::new(FlakyProvider::new());
        let p = pipeline(provider.clone());

        let a = p.embed("dancer in mumbai").await.unwrap();
        let b = p.embed("dancer in mumbai").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cached_entry_survives_provider_outage() {
        let provider = Arc::new(FlakyProvider::new());
        let p = pipeline(provider.clone());

        let a = p.embed("dancer in mumbai").await.unwrap();
        provider.fail.store(true, Ordering::SeqCst);
        // Cached input still embeds; a fresh one surfaces ProviderUnavailable
        assert_eq!(p.embed("dancer in mumbai").await.unwrap(), a);
        let err = p.embed("new text never seen").await.unwrap_err();
        assert_eq!(err.kind(), "provider_unavailable");
    }

    #[tokio::test]
    async fn test_batch_preserves_order_and_batches_misses() {
        let provider = Arc::new(FlakyProvider::new());
        let p = pipeline(provider.clone());

        // Warm one entry
        let warm = p.embed("b").await.unwrap();

        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let vectors = p.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(vectors[1], warm);
        // 1 warm call + 2 misses
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }
}
