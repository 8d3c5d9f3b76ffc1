//! Embedding clients.
//!
//! The search core only sees the [`EmbeddingClient`] capability; the HTTP
//! client, the deterministic fake and the retry wrapper are interchangeable
//! behind it.

pub mod clip;
pub mod fake;
pub mod retry;

use std::future::Future;

use async_trait::async_trait;
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::utils::errors::{Result, SearchError};
use crate::utils::types::Embedding;

pub use clip::ClipEmbedder;
pub use fake::FakeEmbedder;
pub use retry::{RetryPolicy, RetryingEmbedder};

/// Where an image comes from: a public URL or raw uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    Url(String),
    Bytes(Vec<u8>),
}

impl ImageRef {
    pub fn url(url: impl Into<String>) -> Self {
        ImageRef::Url(url.into())
    }

    /// Rejects empty references and anything but absolute http(s) URLs.
    pub fn validate(&self) -> Result<()> {
        match self {
            ImageRef::Url(raw) => {
                let raw = raw.trim();
                if raw.is_empty() {
                    return Err(SearchError::validation("image url must not be empty"));
                }
                let parsed = Url::parse(raw)
                    .map_err(|err| SearchError::validation(format!("invalid image url: {err}")))?;
                if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                    return Err(SearchError::validation(
                        "image url must be an absolute http(s) url",
                    ));
                }
                Ok(())
            }
            ImageRef::Bytes(bytes) if bytes.is_empty() => {
                Err(SearchError::validation("image content must not be empty"))
            }
            ImageRef::Bytes(_) => Ok(()),
        }
    }

    pub fn as_url(&self) -> Option<&str> {
        match self {
            ImageRef::Url(url) => Some(url.trim()),
            ImageRef::Bytes(_) => None,
        }
    }
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Length of every vector this client returns.
    fn dimension(&self) -> usize;

    /// Short name used in logs and error messages.
    fn name(&self) -> &str;

    /// Fails with `Upstream`/`Timeout` when the service is unavailable and
    /// with `DimensionMismatch` when it answers with the wrong length.
    async fn embed_image(&self, image: &ImageRef) -> Result<Embedding>;

    /// `text` must be non-empty.
    async fn embed_text(&self, text: &str) -> Result<Embedding>;
}

/// Passes `vector` through when it has `expected` entries.
pub fn ensure_dimension(expected: usize, vector: Embedding) -> Result<Embedding> {
    if vector.len() != expected {
        return Err(SearchError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(vector)
}

/// Races `call` against `token`; a cancelled token drops the call and
/// yields `Cancelled`.
pub async fn cancellable<T, F>(token: &CancellationToken, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if token.is_cancelled() {
        return Err(SearchError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(SearchError::Cancelled),
        result = call => result,
    }
}

pub(crate) fn require_text(text: &str) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SearchError::validation("query text must not be empty"));
    }
    Ok(trimmed)
}
