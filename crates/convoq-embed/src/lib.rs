//! Embedding providers and the caching gateway in front of them.
//!
//! The gateway owns retries, deadlines, and a content-hash cache so callers
//! see a single `embed` call regardless of provider flakiness. Vectors are
//! tagged with the provider's model version; mixing versions is the store's
//! problem to prevent, tagging them is ours.

mod gateway;
mod http;
mod mock;

pub use gateway::EmbeddingGateway;
pub use http::HttpEmbedding;
pub use mock::MockEmbedding;

use std::sync::Arc;

use convoq_core::{ConvoqError, EmbeddingConfig, EmbeddingProvider, Result};

/// Builds the provider named by config: an HTTP provider when an endpoint
/// is configured, the deterministic mock otherwise.
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    if config.endpoint.is_empty() {
        return Ok(Arc::new(MockEmbedding::new(config.dimension)));
    }
    let api_key = std::env::var(&config.api_key_env).map_err(|_| {
        ConvoqError::config(format!(
            "embedding api key env var {} is not set",
            config.api_key_env
        ))
    })?;
    Ok(Arc::new(HttpEmbedding::new(
        config.endpoint.clone(),
        api_key,
        config.model.clone(),
        config.dimension,
        config.max_batch,
        config.timeout_ms,
    )?))
}
