use async_trait::async_trait;
use convoq_core::{EmbeddingProvider, Result};

/// Deterministic in-process embedder for tests and offline runs.
///
/// Vectors are seeded from a content hash, so identical text always embeds
/// identically and distinct texts land nearly orthogonal. Useful for
/// exercising retrieval thresholds without a provider.
pub struct MockEmbedding {
    dimension: usize,
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let hash = blake3::hash(text.as_bytes());
        let bytes = hash.as_bytes();
        let mut state = u64::from_le_bytes(bytes[..8].try_into().unwrap()) | 1;

        let mut vector = Vec::with_capacity(self.dimension);
        for _ in 0..self.dimension {
            // Simple multiplicative congruential step over the seed.
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let unit = ((state >> 33) as f32) / ((1u64 << 31) as f32);
            vector.push(unit - 0.5);
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_version(&self) -> &str {
        "mock-v1"
    }

    fn max_batch(&self) -> usize {
        64
    }
}
