use std::time::Duration;

use thiserror::Error;

use crate::utils::types::EntityId;

/// Central error enum for the search service.
///
/// Every component returns this type so that the originating kind survives
/// propagation: an upstream failure inside the embedding client reaches the
/// HTTP layer as `Upstream`, not as a generic failure.
#[derive(Error, Debug)]
pub enum SearchError {
    /// Bad input shape or dimension. The caller's fault, never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// An embedding service returned a vector of the wrong length.
    #[error("embedding length mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A query embedding does not match the collection dimension.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("{service} did not answer within {limit:?}")]
    Timeout {
        service: &'static str,
        limit: Duration,
    },

    /// Ingestion could not obtain an embedding; wraps the originating error.
    #[error("embedding failed: {0}")]
    EmbeddingFailure(#[source] Box<SearchError>),

    /// The query succeeded but produced no page.
    #[error("no results for page {page}")]
    NotFound { page: u32 },

    #[error("entity {0} does not exist")]
    UnknownEntity(EntityId),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    pub fn validation(message: impl Into<String>) -> Self {
        SearchError::Validation(message.into())
    }

    /// Validation failure for a vector whose length differs from the collection's.
    pub fn wrong_dimension(expected: usize, actual: usize) -> Self {
        SearchError::Validation(format!(
            "vector length mismatch: expected {expected}, got {actual}"
        ))
    }

    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        SearchError::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Upstream and timeout failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Upstream { .. } | SearchError::Timeout { .. } => true,
            SearchError::EmbeddingFailure(inner) => inner.is_retryable(),
            _ => false,
        }
    }
}
