//! Error types for the RAG pipeline.
//!
//! Every library operation returns [`Result<T>`], an alias over
//! [`RagError`]. No layer retries or swallows failures on its own: the
//! error reaches the immediate caller, which decides whether to back off
//! and try again (see [`RagError::is_retryable`] and
//! [`crate::embedding::retry::RetryingEmbedder`]).

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while building, persisting, or querying an index
/// and while talking to the embedding and language-model services.
#[derive(Debug, Error)]
pub enum RagError {
    /// A source document could not be read, parsed, or is of an unsupported type.
    #[error("failed to load {}: {message}", path.display())]
    Load { path: PathBuf, message: String },

    /// Invalid chunk size / overlap combination.
    #[error("invalid chunking configuration: {0}")]
    ChunkConfig(String),

    /// Network, authentication, or protocol failure from an external service.
    #[error("{provider} service error: {message}")]
    Service {
        provider: String,
        message: String,
        /// Whether the failure is transient (5xx, transport error).
        retryable: bool,
    },

    /// The external service throttled the request (HTTP 429).
    #[error("{provider} rate limit exceeded: {message}")]
    RateLimit { provider: String, message: String },

    /// A search with `k > 0` was issued against an index with no entries.
    #[error("cannot search an empty index")]
    EmptyIndex,

    /// The persisted index was built with a different embedding model or dimension.
    #[error(
        "index was built with {found_model} ({found_dims} dims) but the embedder is {expected_model} ({expected_dims} dims)"
    )]
    DescriptorMismatch {
        expected_model: String,
        expected_dims: usize,
        found_model: String,
        found_dims: usize,
    },

    /// A vector's length differs from the index dimension.
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// SQLite or filesystem failure while saving or loading an index.
    #[error("index storage error: {0}")]
    Storage(String),

    /// The answer stream was collected after a fragment failed.
    #[error("answer stream aborted by an earlier error")]
    StreamAborted,
}

impl RagError {
    pub(crate) fn load(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        RagError::Load {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn service(provider: &str, message: impl ToString, retryable: bool) -> Self {
        RagError::Service {
            provider: provider.to_string(),
            message: message.to_string(),
            retryable,
        }
    }

    /// True for throttling and transient service failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::RateLimit { .. } => true,
            RagError::Service { retryable, .. } => *retryable,
            _ => false,
        }
    }
}

impl From<sqlx::Error> for RagError {
    fn from(e: sqlx::Error) -> Self {
        RagError::Storage(e.to_string())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RagError>;
