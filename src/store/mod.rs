//! Vector store adapters.
//!
//! A store persists `(id, vector, metadata)` tuples for one collection of
//! fixed dimension and answers similarity queries over them. It is the only
//! shared mutable state in the service.

pub mod memory;
pub mod pgvector;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::payload_storage::filters::Filter;
use crate::ranking::page::{Neighbor, RankRange};
use crate::utils::errors::{Result, SearchError};
use crate::utils::metadata::Metadata;
use crate::utils::types::{Distance, EntityId, Embedding, Score};

pub use memory::InMemoryStore;
pub use pgvector::{PgVectorStore, TableName};

/// An entity as handed to the store; the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub vector: Embedding,
    pub metadata: Metadata,
}

/// An entity as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedEntity {
    pub id: EntityId,
    pub vector: Embedding,
    pub metadata: Metadata,
}

/// Parameters of a single storage-side filter + rank + page operation.
#[derive(Debug, Clone, Copy)]
pub struct RankedQuery<'a> {
    pub embedding: &'a [f32],
    /// Rows must have `1 - distance` strictly above this value.
    pub min_similarity: Score,
    pub filter: Option<&'a Filter>,
    pub ranks: RankRange,
}

/// One row of a ranked page.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRow {
    pub id: EntityId,
    pub distance: Distance,
    pub rank: u64,
    pub metadata: Metadata,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimension every stored vector must have.
    fn dimension(&self) -> usize;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Persists a new entity and returns its id. Fails with `Validation` on
    /// a dimension mismatch; the write is complete when this returns.
    async fn insert(&self, entity: NewEntity) -> Result<EntityId>;

    /// Removes an entity. Unknown ids are a no-op.
    async fn delete(&self, id: EntityId) -> Result<()>;

    async fn get(&self, id: EntityId) -> Result<Option<IndexedEntity>>;

    /// Number of live entities.
    async fn len(&self) -> Result<usize>;

    /// Up to `limit` entities in ascending distance, ties by ascending id.
    async fn query_nearest(&self, embedding: &[f32], limit: usize) -> Result<Vec<Neighbor>>;

    /// Rows ranked inside `query.ranks`, computed in one storage operation.
    async fn query_ranked(&self, query: RankedQuery<'_>) -> Result<Vec<RankedRow>>;
}

/// Runs a store call under a deadline; an elapsed deadline is a `Timeout`.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SearchError::Timeout {
            service: "vector store",
            limit,
        }),
    }
}

pub(crate) fn check_dimension(expected: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != expected {
        return Err(SearchError::wrong_dimension(expected, vector.len()));
    }
    Ok(())
}
