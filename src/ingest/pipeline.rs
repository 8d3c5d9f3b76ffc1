use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::embedding::{EmbeddingClient, ImageRef, cancellable};
use crate::store::{NewEntity, VectorStore, bounded};
use crate::utils::errors::{Result, SearchError};
use crate::utils::metadata::{Metadata, MetadataValue};
use crate::utils::types::{EntityId, Embedding};

/// Metadata key holding the source URL of an ingested image.
pub const IMAGE_URL_KEY: &str = "image_url";

/// Validates an image, embeds it and stores entity + vector in one write.
///
/// Nothing is written unless every earlier step succeeded, so a failed
/// ingest leaves no entity behind.
pub struct IngestionPipeline {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    store_timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            store_timeout,
        }
    }

    pub async fn ingest(
        &self,
        image: &ImageRef,
        mut metadata: Metadata,
        cancel: &CancellationToken,
    ) -> Result<EntityId> {
        image.validate()?;

        let vector = self.embed(image, cancel).await?;
        self.check_dimension(&vector)?;

        if let Some(url) = image.as_url() {
            metadata.set(IMAGE_URL_KEY, MetadataValue::from(url));
        }
        let id = bounded(
            self.store_timeout,
            self.store.insert(NewEntity { vector, metadata }),
        )
        .await?;

        info!(id, store = self.store.name(), "ingested image");
        Ok(id)
    }

    /// Embeds `image` again for an existing entity. The new vector is stored
    /// under a new id with the old metadata, then the old entity is removed.
    /// If that removal fails the new entity is dropped again, so an error
    /// leaves only the old entity live.
    pub async fn reembed(
        &self,
        id: EntityId,
        image: &ImageRef,
        cancel: &CancellationToken,
    ) -> Result<EntityId> {
        let existing = bounded(self.store_timeout, self.store.get(id))
            .await?
            .ok_or(SearchError::UnknownEntity(id))?;

        let new_id = self.ingest(image, existing.metadata, cancel).await?;
        if let Err(err) = self.remove(id).await {
            if let Err(rollback) = self.remove(new_id).await {
                warn!(new_id, error = %rollback, "failed to drop re-embedded entity");
            }
            warn!(old_id = id, new_id, error = %err, "re-embed rolled back");
            return Err(err);
        }

        info!(old_id = id, new_id, "re-embedded entity");
        Ok(new_id)
    }

    /// Idempotent: removing an unknown id succeeds.
    pub async fn remove(&self, id: EntityId) -> Result<()> {
        bounded(self.store_timeout, self.store.delete(id)).await
    }

    async fn embed(&self, image: &ImageRef, cancel: &CancellationToken) -> Result<Embedding> {
        match cancellable(cancel, self.embedder.embed_image(image)).await {
            Ok(vector) => Ok(vector),
            Err(SearchError::DimensionMismatch { expected, actual }) => {
                Err(SearchError::wrong_dimension(expected, actual))
            }
            Err(err @ (SearchError::Validation(_) | SearchError::Cancelled)) => Err(err),
            Err(err) => Err(SearchError::EmbeddingFailure(Box::new(err))),
        }
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let expected = self.store.dimension();
        if vector.len() != expected {
            return Err(SearchError::wrong_dimension(expected, vector.len()));
        }
        Ok(())
    }
}
