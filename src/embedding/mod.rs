//! Embedding adapter abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete HTTP implementations:
//! - **[`OpenAiEmbedder`]**: calls an OpenAI-compatible `POST /embeddings` endpoint.
//! - **[`OllamaEmbedder`]**: calls a local Ollama instance's `/api/embed` endpoint.
//!
//! Also provides:
//! - [`embed_all`]: batch a large input, run batches concurrently, and
//!   reassemble results in input order
//! - [`vec_to_blob`] / [`blob_to_vec`]: little-endian `f32` encoding used by
//!   index persistence
//!
//! # Provider Selection
//!
//! Use [`create_embedder`] to build the adapter named by the configuration.
//! The credential is read once, from the environment variable named in
//! `embedding.api_key_env`, and handed to the adapter's constructor.
//!
//! # Failures
//!
//! Adapters never retry. HTTP 429 surfaces as [`RagError::RateLimit`] and
//! every other failure as [`RagError::Service`]; wrap an adapter in
//! [`retry::RetryingEmbedder`] to opt into backoff.

pub mod retry;

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::config::{resolve_api_key, EmbeddingConfig};
use crate::error::{RagError, Result};
use crate::http;
use crate::models::Vector;

/// Identity of the embedding model an index was built with.
///
/// Distances are only meaningful between vectors from the same model, so
/// the descriptor is stored with every saved index and checked on load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedderDescriptor {
    /// Model identifier (e.g. `"text-embedding-3-small"`).
    pub model: String,
    /// Vector dimensionality (e.g. `1536`).
    pub dims: usize,
}

impl EmbedderDescriptor {
    pub fn new(model: impl Into<String>, dims: usize) -> Self {
        Self {
            model: model.into(),
            dims,
        }
    }
}

/// An external service that maps text to fixed-length vectors.
///
/// Implementations must return exactly one vector per input, in input
/// order, each of length `descriptor().dims`.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn descriptor(&self) -> &EmbedderDescriptor;

    /// Embed one batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Embed a single query text.
    async fn embed_query(&self, text: &str) -> Result<Vector> {
        let results = self.embed(&[text.to_string()]).await?;
        results.into_iter().next().ok_or_else(|| {
            RagError::service(&self.descriptor().model, "empty embedding response", false)
        })
    }
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    fn descriptor(&self) -> &EmbedderDescriptor {
        (**self).descriptor()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        (**self).embed(texts).await
    }
}

/// Embed any number of texts in batches of at most `batch_size`, with up to
/// `concurrency` batches in flight.
///
/// The output order always matches `texts`, regardless of the order in
/// which batch requests complete. The first failing batch aborts the call.
pub async fn embed_all(
    embedder: &dyn Embedder,
    texts: &[String],
    batch_size: usize,
    concurrency: usize,
) -> Result<Vec<Vector>> {
    let batch_size = batch_size.max(1);
    let batches: Vec<&[String]> = texts.chunks(batch_size).collect();
    let total = batches.len();

    let per_batch: Vec<Vec<Vector>> = stream::iter(batches.into_iter().enumerate().map(
        |(i, batch)| async move {
            let vectors = embedder.embed(batch).await?;
            check_batch(embedder.descriptor(), batch.len(), &vectors)?;
            debug!(batch = i + 1, total, size = batch.len(), "embedded batch");
            Ok::<_, RagError>(vectors)
        },
    ))
    .buffered(concurrency.max(1))
    .try_collect()
    .await?;

    Ok(per_batch.into_iter().flatten().collect())
}

fn check_batch(descriptor: &EmbedderDescriptor, expected: usize, vectors: &[Vector]) -> Result<()> {
    if vectors.len() != expected {
        return Err(RagError::service(
            &descriptor.model,
            format!("expected {} embeddings, got {}", expected, vectors.len()),
            false,
        ));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != descriptor.dims) {
        return Err(RagError::service(
            &descriptor.model,
            format!(
                "embedding has {} dims, expected {}",
                v.len(),
                descriptor.dims
            ),
            false,
        ));
    }
    Ok(())
}

/// Build the embedder named by `config.provider`, wrapped in a
/// [`retry::RetryingEmbedder`] when `max_retries > 0`.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider.as_str() {
        "openai" => {
            let api_key = resolve_api_key(&config.api_key_env)?;
            Arc::new(OpenAiEmbedder::new(config, api_key)?)
        }
        "ollama" => Arc::new(OllamaEmbedder::new(config)?),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    };
    if config.max_retries > 0 {
        return Ok(Arc::new(retry::RetryingEmbedder::new(
            embedder,
            config.max_retries,
        )));
    }
    Ok(embedder)
}

// ============ OpenAI ============

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";

/// Embedder backed by an OpenAI-compatible embeddings API.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    descriptor: EmbedderDescriptor,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client: http::build_client("openai", config.timeout_secs)?,
            base_url: http::base_url(config.url.as_deref(), OPENAI_DEFAULT_URL),
            api_key: api_key.into(),
            descriptor: EmbedderDescriptor::new(config.model.clone(), config.dims),
        })
    }
}

#[derive(Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn descriptor(&self) -> &EmbedderDescriptor {
        &self.descriptor
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = OpenAiEmbeddingRequest {
            model: &self.descriptor.model,
            input: texts,
        };
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| http::transport_error("openai", e))?;

        if !response.status().is_success() {
            return Err(http::status_error("openai", response).await);
        }

        let mut parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::service("openai", format!("invalid response: {}", e), false))?;

        // The API may return items out of order; `index` is authoritative.
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

// ============ Ollama ============

const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// Embedder backed by a local Ollama instance.
///
/// Requires Ollama to be running with an embedding model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    descriptor: EmbedderDescriptor,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: http::build_client("ollama", config.timeout_secs)?,
            base_url: http::base_url(config.url.as_deref(), OLLAMA_DEFAULT_URL),
            descriptor: EmbedderDescriptor::new(config.model.clone(), config.dims),
        })
    }
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn descriptor(&self) -> &EmbedderDescriptor {
        &self.descriptor
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.descriptor.model,
            "input": texts,
        });
        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::service(
                    "ollama",
                    format!(
                        "connection error (is Ollama running at {}?): {}",
                        self.base_url, e
                    ),
                    true,
                )
            })?;

        if !response.status().is_success() {
            return Err(http::status_error("ollama", response).await);
        }

        let parsed: OllamaEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::service("ollama", format!("invalid response: {}", e), false))?;
        Ok(parsed.embeddings)
    }
}

// ============ Vector encoding ============

/// Encode a float vector as little-endian `f32` bytes.
///
/// # Example
///
/// ```rust
/// use rag_harness::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode bytes written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Encodes each text's first byte; sleeps longer for earlier batches so
    /// they complete last.
    struct SlowFirstEmbedder {
        descriptor: EmbedderDescriptor,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for SlowFirstEmbedder {
        fn descriptor(&self) -> &EmbedderDescriptor {
            &self.descriptor
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(call as u64 * 10))).await;
            Ok(texts
                .iter()
                .map(|t| vec![t.parse::<f32>().unwrap_or(-1.0), 0.0])
                .collect())
        }
    }

    struct ShortEmbedder(EmbedderDescriptor);

    #[async_trait]
    impl Embedder for ShortEmbedder {
        fn descriptor(&self) -> &EmbedderDescriptor {
            &self.0
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
            Ok(texts.iter().skip(1).map(|_| vec![0.0; 2]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_all_preserves_input_order() {
        let embedder = SlowFirstEmbedder {
            descriptor: EmbedderDescriptor::new("fake", 2),
            calls: AtomicUsize::new(0),
        };
        let texts: Vec<String> = (0..10).map(|i| i.to_string()).collect();
        let vectors = embed_all(&embedder, &texts, 3, 4).await.unwrap();
        assert_eq!(vectors.len(), 10);
        for (i, v) in vectors.iter().enumerate() {
            assert_eq!(v[0], i as f32);
        }
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_embed_all_rejects_count_mismatch() {
        let embedder = ShortEmbedder(EmbedderDescriptor::new("fake", 2));
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_all(&embedder, &texts, 8, 1).await.unwrap_err();
        assert!(matches!(err, RagError::Service { .. }));
    }

    #[tokio::test]
    async fn test_embed_all_rejects_wrong_dims() {
        let embedder = SlowFirstEmbedder {
            descriptor: EmbedderDescriptor::new("fake", 3),
            calls: AtomicUsize::new(0),
        };
        let err = embed_all(&embedder, &["1".to_string()], 8, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expected 3"));
    }

    #[tokio::test]
    async fn test_embed_all_empty_input() {
        let embedder = ShortEmbedder(EmbedderDescriptor::new("fake", 2));
        assert!(embed_all(&embedder, &[], 8, 2).await.unwrap().is_empty());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001, f32::MIN_POSITIVE];
        let restored = blob_to_vec(&vec_to_blob(&vec));
        assert_eq!(vec, restored);
    }
}
