//! Error types for the conversation engine.

use thiserror::Error;

/// Result type alias using ConvoqError.
pub type Result<T> = std::result::Result<T, ConvoqError>;

/// Errors that can occur in the conversation engine.
#[derive(Error, Debug)]
pub enum ConvoqError {
    /// The declared document format has no parser variant.
    #[error("Unsupported document format: {format}")]
    UnsupportedFormat { format: String },

    /// Document bytes could not be extracted structurally.
    #[error("Corrupt input: {reason}")]
    CorruptInput { reason: String },

    /// The embedding provider is unreachable or failing transiently.
    #[error("Embedding unavailable: {reason}")]
    EmbeddingUnavailable { reason: String },

    /// The vector index could not be queried.
    #[error("Retrieval degraded: {reason}")]
    RetrievalDegraded { reason: String },

    /// The language-generation gateway failed or timed out.
    #[error("Generation failed: {reason}")]
    GenerationFailed { reason: String },

    /// A code path produced or would have produced cross-workspace data.
    /// This is a defect, never a recoverable condition.
    #[error("Tenancy violation: {message}")]
    TenancyViolation { message: String },

    /// Workspace not found.
    #[error("Workspace not found: {id}")]
    WorkspaceNotFound { id: String },

    /// Document not found.
    #[error("Document not found: {id}")]
    DocumentNotFound { id: String },

    /// Chat not found.
    #[error("Chat not found: {id}")]
    ChatNotFound { id: String },

    /// Invalid argument provided.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Database error.
    #[error("Database error: {message}")]
    Database { message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal error (unexpected).
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ConvoqError {
    /// Create an unsupported-format error.
    pub fn unsupported_format(format: impl Into<String>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    /// Create a corrupt-input error.
    pub fn corrupt_input(reason: impl Into<String>) -> Self {
        Self::CorruptInput {
            reason: reason.into(),
        }
    }

    /// Create an embedding-unavailable error.
    pub fn embedding_unavailable(reason: impl Into<String>) -> Self {
        Self::EmbeddingUnavailable {
            reason: reason.into(),
        }
    }

    /// Create a retrieval-degraded error.
    pub fn retrieval_degraded(reason: impl Into<String>) -> Self {
        Self::RetrievalDegraded {
            reason: reason.into(),
        }
    }

    /// Create a generation-failed error.
    pub fn generation_failed(reason: impl Into<String>) -> Self {
        Self::GenerationFailed {
            reason: reason.into(),
        }
    }

    /// Create a tenancy-violation error.
    pub fn tenancy_violation(message: impl Into<String>) -> Self {
        Self::TenancyViolation {
            message: message.into(),
        }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a retry of the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable { .. }
                | Self::RetrievalDegraded { .. }
                | Self::GenerationFailed { .. }
        )
    }

    /// Get the stable error code for boundary responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedFormat { .. } => "UNSUPPORTED_FORMAT",
            Self::CorruptInput { .. } => "CORRUPT_INPUT",
            Self::EmbeddingUnavailable { .. } => "EMBEDDING_UNAVAILABLE",
            Self::RetrievalDegraded { .. } => "RETRIEVAL_DEGRADED",
            Self::GenerationFailed { .. } => "GENERATION_FAILED",
            Self::TenancyViolation { .. } => "TENANCY_VIOLATION",
            Self::WorkspaceNotFound { .. } => "WORKSPACE_NOT_FOUND",
            Self::DocumentNotFound { .. } => "DOCUMENT_NOT_FOUND",
            Self::ChatNotFound { .. } => "CHAT_NOT_FOUND",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
            Self::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConvoqError::UnsupportedFormat {
            format: "docx".to_string(),
        };
        assert!(err.to_string().contains("docx"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ConvoqError::corrupt_input("truncated sheet").error_code(),
            "CORRUPT_INPUT"
        );
        assert_eq!(
            ConvoqError::tenancy_violation("x").error_code(),
            "TENANCY_VIOLATION"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(ConvoqError::embedding_unavailable("503").is_transient());
        assert!(ConvoqError::generation_failed("timeout").is_transient());
        assert!(!ConvoqError::corrupt_input("bad zip").is_transient());
        assert!(!ConvoqError::tenancy_violation("leak").is_transient());
    }
}
