use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use convoq_core::{ConvoqError, EmbeddingConfig, EmbeddingProvider, Result};
use lru::LruCache;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Caching, retrying front for an embedding provider.
///
/// Ingestion batches go straight to the provider in `max_batch` slices.
/// Query embeddings go through a bounded content-hash cache, since the same
/// short incoming messages repeat across chats.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    max_attempts: u32,
    backoff: Duration,
    cache: Mutex<LruCache<[u8; 32], Vec<f32>>>,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let entries = NonZeroUsize::new(config.cache_entries.max(1))
            .unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            provider,
            max_attempts: config.max_attempts.max(1),
            backoff: Duration::from_millis(config.backoff_ms),
            cache: Mutex::new(LruCache::new(entries)),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn model_version(&self) -> &str {
        self.provider.model_version()
    }

    /// Embed a batch of texts, slicing to the provider's batch limit and
    /// retrying transient failures with doubling backoff. Order is
    /// preserved.
    pub async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for slice in texts.chunks(self.provider.max_batch()) {
            vectors.extend(self.embed_with_retry(slice).await?);
        }
        Ok(vectors)
    }

    /// Embed a single query string through the cache.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let key = *blake3::hash(text.as_bytes()).as_bytes();
        {
            let mut cache = self.cache.lock().await;
            if let Some(vector) = cache.get(&key) {
                debug!("query embedding cache hit");
                return Ok(vector.clone());
            }
        }
        let mut vectors = self.embed_with_retry(&[text]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| ConvoqError::embedding_unavailable("provider returned no vector"))?;
        self.cache.lock().await.put(key, vector.clone());
        Ok(vector)
    }

    async fn embed_with_retry(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut delay = self.backoff;
        for attempt in 1..=self.max_attempts {
            match self.provider.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(attempt, error = %e, "embedding attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ConvoqError::embedding_unavailable("retries exhausted"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MockEmbedding;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then delegates to the mock.
    struct FlakyProvider {
        inner: MockEmbedding,
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(ConvoqError::embedding_unavailable("simulated outage"));
            }
            self.inner.embed(texts).await
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_version(&self) -> &str {
            "flaky-v1"
        }

        fn max_batch(&self) -> usize {
            2
        }
    }

    fn test_config() -> EmbeddingConfig {
        EmbeddingConfig {
            max_attempts: 3,
            backoff_ms: 1,
            cache_entries: 8,
            ..EmbeddingConfig::default()
        }
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let provider = Arc::new(FlakyProvider {
            inner: MockEmbedding::new(16),
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let gateway = EmbeddingGateway::new(provider.clone(), &test_config());
        let vectors = gateway.embed_batch(&["hello"]).await.unwrap();
        assert_eq!(vectors.len(), 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider = Arc::new(FlakyProvider {
            inner: MockEmbedding::new(16),
            failures: 10,
            calls: AtomicU32::new(0),
        });
        let gateway = EmbeddingGateway::new(provider.clone(), &test_config());
        let err = gateway.embed_batch(&["hello"]).await.unwrap_err();
        assert_eq!(err.error_code(), "EMBEDDING_UNAVAILABLE");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slices_batches_to_provider_limit() {
        let provider = Arc::new(FlakyProvider {
            inner: MockEmbedding::new(16),
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let gateway = EmbeddingGateway::new(provider.clone(), &test_config());
        let texts = ["a", "b", "c", "d", "e"];
        let vectors = gateway.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 5);
        // max_batch of 2 means three provider calls
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn query_cache_short_circuits_provider() {
        let provider = Arc::new(FlakyProvider {
            inner: MockEmbedding::new(16),
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let gateway = EmbeddingGateway::new(provider.clone(), &test_config());
        let first = gateway.embed_query("how much is shipping?").await.unwrap();
        let second = gateway.embed_query("how much is shipping?").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
}
