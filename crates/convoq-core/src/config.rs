//! Configuration types for the conversation engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvoqConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Embedding gateway configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Chunking configuration.
    #[serde(default)]
    pub chunking: ChunkingConfig,

    /// Retrieval configuration.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Conversation memory configuration.
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Language-generation gateway configuration.
    #[serde(default)]
    pub generation: GenerationConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file.
    pub path: PathBuf,

    /// SQLite cache size in KB (negative = KB, positive = pages).
    #[serde(default = "default_cache_size")]
    pub cache_size: i32,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            cache_size: -64000, // 64MB
            busy_timeout_ms: 30000,
        }
    }
}

/// Embedding gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider endpoint base URL (OpenAI-compatible). Empty = mock.
    #[serde(default)]
    pub endpoint: String,

    /// Environment variable holding the provider API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model name sent to the provider; doubles as the version tag
    /// stored alongside vectors.
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension.
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Provider-imposed batch size limit.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,

    /// Maximum attempts per batch before the document is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff between attempts in milliseconds (doubles per retry).
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Per-call deadline in milliseconds.
    #[serde(default = "default_embed_timeout")]
    pub timeout_ms: u64,

    /// Bounded query-embedding cache entries.
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key_env: default_api_key_env(),
            model: default_embedding_model(),
            dimension: default_dimension(),
            max_batch: default_max_batch(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            timeout_ms: default_embed_timeout(),
            cache_entries: default_cache_entries(),
        }
    }
}

/// Chunking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Tokens of trailing context carried into the next chunk.
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 50,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of snippets surfaced to generation.
    #[serde(default = "default_top_k")]
    pub top_k: u32,

    /// Minimum cosine similarity for a candidate to be kept.
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Cap on snippets from a single document.
    #[serde(default = "default_max_per_document")]
    pub max_per_document: u32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_score: 0.35,
            max_per_document: 2,
        }
    }
}

/// Conversation memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Most recent turns surfaced to generation. Older turns stay
    /// persisted but are excluded from prompt context.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { max_turns: 20 }
    }
}

/// Language-generation gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Gateway endpoint base URL (OpenAI-compatible). Empty = mock.
    #[serde(default)]
    pub endpoint: String,

    /// Environment variable holding the gateway API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model name sent to the gateway.
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Maximum tokens to generate.
    #[serde(default = "default_gen_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call deadline in milliseconds.
    #[serde(default = "default_gen_timeout")]
    pub timeout_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key_env: default_api_key_env(),
            model: default_generation_model(),
            max_tokens: default_gen_max_tokens(),
            temperature: default_temperature(),
            timeout_ms: default_gen_timeout(),
        }
    }
}

// Default value functions

fn default_cache_size() -> i32 {
    -64000
}

fn default_busy_timeout() -> u32 {
    30000
}

fn default_api_key_env() -> String {
    "CONVOQ_API_KEY".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_dimension() -> usize {
    768
}

fn default_max_batch() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_embed_timeout() -> u64 {
    15000
}

fn default_cache_entries() -> usize {
    1024
}

fn default_max_tokens() -> usize {
    512
}

fn default_overlap_tokens() -> usize {
    50
}

fn default_top_k() -> u32 {
    5
}

fn default_min_score() -> f32 {
    0.35
}

fn default_max_per_document() -> u32 {
    2
}

fn default_max_turns() -> u32 {
    20
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_gen_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.4
}

fn default_gen_timeout() -> u64 {
    30000
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("convoq")
        .join("convoq.db")
}

impl ConvoqConfig {
    /// Load configuration from file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| crate::error::ConvoqError::Config {
            message: format!("Failed to parse config: {}", e),
        })?;
        Ok(config)
    }

    /// Load configuration from default paths.
    pub fn load_default() -> crate::error::Result<Self> {
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("convoq").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        let local_config = PathBuf::from("convoq.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConvoqConfig::default();
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.chunking.max_tokens, 512);
        assert_eq!(config.conversation.max_turns, 20);
        assert_eq!(config.embedding.dimension, 768);
    }

    #[test]
    fn test_partial_toml() {
        let config: ConvoqConfig = toml::from_str(
            r#"
            [retrieval]
            top_k = 3
            min_score = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert!((config.retrieval.min_score - 0.8).abs() < f32::EPSILON);
        // Untouched sections fall back to defaults
        assert_eq!(config.embedding.max_batch, 64);
    }
}
