use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::embedding::{EmbeddingClient, ImageRef};
use crate::utils::errors::Result;
use crate::utils::types::Embedding;

/// Bounded exponential backoff for upstream embedding calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included. At least 1.
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based): base, 2×base, 4×base...
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(5) as u32;
        self.base_delay * (1u32 << shift)
    }
}

/// Retries `Upstream` and `Timeout` failures of the wrapped client.
/// Validation and dimension errors pass through on the first attempt.
pub struct RetryingEmbedder {
    inner: Arc<dyn EmbeddingClient>,
    policy: RetryPolicy,
}

impl RetryingEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    async fn run<F, Fut>(&self, op: &'static str, mut call: F) -> Result<Embedding>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Embedding>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        client = self.inner.name(),
                        op,
                        attempt,
                        ?delay,
                        error = %err,
                        "retrying embedding call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }
}

#[async_trait]
impl EmbeddingClient for RetryingEmbedder {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn embed_image(&self, image: &ImageRef) -> Result<Embedding> {
        self.run("embed_image", || self.inner.embed_image(image))
            .await
    }

    async fn embed_text(&self, text: &str) -> Result<Embedding> {
        self.run("embed_text", || self.inner.embed_text(text))
            .await
    }
}
