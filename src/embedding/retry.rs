//! Caller-side retry policy for embedders.
//!
//! Adapters surface throttling and transient failures instead of retrying.
//! [`RetryingEmbedder`] is the opt-in layer around them:
//! - [`RagError::RateLimit`] and retryable [`RagError::Service`] → retry
//! - anything else → fail immediately
//! - backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5 × base delay)

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{Embedder, EmbedderDescriptor};
use crate::error::Result;
use crate::models::Vector;

pub struct RetryingEmbedder {
    inner: Arc<dyn Embedder>,
    max_retries: u32,
    base_delay: Duration,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_retries: u32) -> Self {
        Self {
            inner,
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Override the first backoff delay.
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt - 1).min(5))
    }
}

#[async_trait]
impl Embedder for RetryingEmbedder {
    fn descriptor(&self) -> &EmbedderDescriptor {
        self.inner.descriptor()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vector>> {
        let mut attempt = 0;
        loop {
            match self.inner.embed(texts).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.delay_for(attempt);
                    warn!(attempt, ?delay, error = %e, "embedding request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
