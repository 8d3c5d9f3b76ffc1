//! In-memory vector store backed by a single [`Segment`].
//!
//! Every query takes the read lock once and runs against that snapshot, so a
//! page is internally consistent even while inserts and deletes proceed.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::ranking::page::Neighbor;
use crate::segment::segment::Segment;
use crate::store::{IndexedEntity, NewEntity, RankedQuery, RankedRow, VectorStore};
use crate::utils::errors::Result;
use crate::utils::types::EntityId;

pub struct InMemoryStore {
    dim: usize,
    segment: RwLock<Segment>,
}

impl InMemoryStore {
    pub fn new(dim: usize) -> Result<Self> {
        Ok(Self {
            dim,
            segment: RwLock::new(Segment::new(dim)?),
        })
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert(&self, entity: NewEntity) -> Result<EntityId> {
        let id = self
            .segment
            .write()
            .await
            .insert(entity.vector, entity.metadata)?;
        debug!(id, "stored entity");
        Ok(id)
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        if self.segment.write().await.delete(id) {
            info!(id, "deleted entity");
        }
        Ok(())
    }

    async fn get(&self, id: EntityId) -> Result<Option<IndexedEntity>> {
        let segment = self.segment.read().await;
        let entity = segment.get_vector(id).map(|vector| IndexedEntity {
            id,
            vector: vector.clone(),
            metadata: segment.get_metadata(id).cloned().unwrap_or_default(),
        });
        Ok(entity)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.segment.read().await.len())
    }

    async fn query_nearest(&self, embedding: &[f32], limit: usize) -> Result<Vec<Neighbor>> {
        self.segment.read().await.nearest(embedding, limit)
    }

    async fn query_ranked(&self, query: RankedQuery<'_>) -> Result<Vec<RankedRow>> {
        let segment = self.segment.read().await;
        let ranked = segment.ranked(
            query.embedding,
            query.min_similarity,
            query.filter,
            query.ranks,
        )?;

        Ok(ranked
            .into_iter()
            .map(|r| RankedRow {
                id: r.id,
                distance: r.distance,
                rank: r.rank,
                metadata: segment.get_metadata(r.id).cloned().unwrap_or_default(),
            })
            .collect())
    }
}
