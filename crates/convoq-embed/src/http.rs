use std::time::Duration;

use async_trait::async_trait;
use convoq_core::{ConvoqError, EmbeddingProvider, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI-compatible HTTP embedding provider.
pub struct HttpEmbedding {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    max_batch: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

impl HttpEmbedding {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        dimension: usize,
        max_batch: usize,
        timeout_ms: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .build()
            .map_err(|e| ConvoqError::embedding_unavailable(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model,
            dimension,
            max_batch,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.len() > self.max_batch {
            return Err(ConvoqError::invalid_argument(format!(
                "batch of {} exceeds provider limit {}",
                texts.len(),
                self.max_batch
            )));
        }

        let url = format!("{}/embeddings", self.endpoint);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ConvoqError::embedding_unavailable(format!("request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConvoqError::embedding_unavailable(format!(
                "provider returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ConvoqError::embedding_unavailable(format!("decode: {}", e)))?;

        if parsed.data.len() != texts.len() {
            return Err(ConvoqError::embedding_unavailable(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }

        let mut items = parsed.data;
        items.sort_by_key(|item| item.index);
        let mut vectors = Vec::with_capacity(items.len());
        for item in items {
            if item.embedding.len() != self.dimension {
                return Err(ConvoqError::embedding_unavailable(format!(
                    "dimension mismatch: expected {}, got {}",
                    self.dimension,
                    item.embedding.len()
                )));
            }
            vectors.push(item.embedding);
        }
        debug!(batch = texts.len(), model = %self.model, "embedded batch");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_version(&self) -> &str {
        &self.model
    }

    fn max_batch(&self) -> usize {
        self.max_batch
    }
}
