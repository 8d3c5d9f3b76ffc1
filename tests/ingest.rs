use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use visium_search::embedding::{EmbeddingClient, FakeEmbedder, ImageRef};
use visium_search::ingest::{IMAGE_URL_KEY, IngestionPipeline};
use visium_search::ranking::page::Neighbor;
use visium_search::store::{
    IndexedEntity, InMemoryStore, NewEntity, RankedQuery, RankedRow, VectorStore,
};
use visium_search::utils::errors::{Result, SearchError};
use visium_search::utils::types::EntityId;
use visium_search::utils::metadata::{Metadata, MetadataValue};

const CAT: &str = "https://img.example/cat.png";

fn setup(fake: FakeEmbedder) -> (Arc<FakeEmbedder>, Arc<InMemoryStore>, IngestionPipeline) {
    let fake = Arc::new(fake);
    let store = Arc::new(InMemoryStore::new(4).unwrap());
    let embedder: Arc<dyn EmbeddingClient> = fake.clone();
    let pipeline = IngestionPipeline::new(embedder, store.clone(), Duration::from_secs(1));
    (fake, store, pipeline)
}

#[tokio::test]
async fn test_ingest_stores_vector_and_metadata() {
    let (_, store, pipeline) = setup(FakeEmbedder::new(4).with_image(CAT, vec![1.0, 0.0, 0.0, 0.0]));
    let metadata = Metadata::default().with("is_ai", MetadataValue::Bool(false));

    let id = pipeline
        .ingest(&ImageRef::url(CAT), metadata, &CancellationToken::new())
        .await
        .unwrap();

    let entity = store.get(id).await.unwrap().unwrap();
    assert_eq!(entity.vector, vec![1.0, 0.0, 0.0, 0.0]);
    assert_eq!(entity.metadata.get("is_ai"), Some(&MetadataValue::Bool(false)));
    assert_eq!(
        entity.metadata.get(IMAGE_URL_KEY),
        Some(&MetadataValue::Str(CAT.to_string()))
    );
}

#[tokio::test]
async fn test_ingest_bytes_has_no_url() {
    let (_, store, pipeline) = setup(FakeEmbedder::new(4));
    let id = pipeline
        .ingest(
            &ImageRef::Bytes(vec![0x89, 0x50, 0x4e, 0x47]),
            Metadata::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let entity = store.get(id).await.unwrap().unwrap();
    assert_eq!(entity.metadata.get(IMAGE_URL_KEY), None);
    assert_eq!(entity.vector.len(), 4);
}

#[tokio::test]
async fn test_ingest_rejects_bad_references_without_calling_out() {
    let (fake, store, pipeline) = setup(FakeEmbedder::new(4));
    let cancel = CancellationToken::new();

    for image in [
        ImageRef::url(""),
        ImageRef::url("ftp://img.example/cat.png"),
        ImageRef::url("cat.png"),
        ImageRef::Bytes(Vec::new()),
    ] {
        let result = pipeline.ingest(&image, Metadata::default(), &cancel).await;
        assert!(
            matches!(result, Err(SearchError::Validation(_))),
            "{image:?} should be rejected"
        );
    }
    assert_eq!(fake.calls(), 0);
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ingest_wraps_upstream_failures() {
    let (fake, store, pipeline) = setup(FakeEmbedder::new(4));
    fake.fail_next(SearchError::upstream("embedding service", "connection refused"));

    let result = pipeline
        .ingest(&ImageRef::url(CAT), Metadata::default(), &CancellationToken::new())
        .await;

    match result {
        Err(SearchError::EmbeddingFailure(inner)) => {
            assert!(matches!(*inner, SearchError::Upstream { .. }));
        }
        other => panic!("expected EmbeddingFailure, got {other:?}"),
    }
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ingest_dimension_mismatch_is_validation() {
    let (_, store, pipeline) = setup(FakeEmbedder::new(4).with_image(CAT, vec![1.0, 0.0]));

    let result = pipeline
        .ingest(&ImageRef::url(CAT), Metadata::default(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(SearchError::Validation(_))));
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ingest_cancelled() {
    let (_, store, pipeline) = setup(FakeEmbedder::new(4));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = pipeline
        .ingest(&ImageRef::url(CAT), Metadata::default(), &cancel)
        .await;

    assert!(matches!(result, Err(SearchError::Cancelled)));
    assert_eq!(store.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_store_rejects_wrong_dimension_directly() {
    let (_, store, _) = setup(FakeEmbedder::new(4));
    let result = store
        .insert(NewEntity {
            vector: vec![0.5; 256],
            metadata: Metadata::default(),
        })
        .await;
    assert!(matches!(result, Err(SearchError::Validation(_))));
}

#[tokio::test]
async fn test_reembed_keeps_metadata_under_new_id() {
    let (_, store, pipeline) = setup(
        FakeEmbedder::new(4)
            .with_image(CAT, vec![1.0, 0.0, 0.0, 0.0])
            .with_image("https://img.example/cat-hd.png", vec![0.0, 1.0, 0.0, 0.0]),
    );
    let cancel = CancellationToken::new();
    let metadata = Metadata::default().with("title", "cat".into());

    let old = pipeline
        .ingest(&ImageRef::url(CAT), metadata, &cancel)
        .await
        .unwrap();
    let new = pipeline
        .reembed(old, &ImageRef::url("https://img.example/cat-hd.png"), &cancel)
        .await
        .unwrap();

    assert_ne!(old, new);
    assert!(store.get(old).await.unwrap().is_none());

    let entity = store.get(new).await.unwrap().unwrap();
    assert_eq!(entity.vector, vec![0.0, 1.0, 0.0, 0.0]);
    assert_eq!(entity.metadata.get("title"), Some(&MetadataValue::Str("cat".into())));
    assert_eq!(
        entity.metadata.get(IMAGE_URL_KEY),
        Some(&MetadataValue::Str("https://img.example/cat-hd.png".into()))
    );
}

#[tokio::test]
async fn test_reembed_unknown_entity() {
    let (_, _, pipeline) = setup(FakeEmbedder::new(4));
    let result = pipeline
        .reembed(42, &ImageRef::url(CAT), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(SearchError::UnknownEntity(42))));
}

#[tokio::test]
async fn test_failed_reembed_keeps_old_entity() {
    let (fake, store, pipeline) = setup(FakeEmbedder::new(4));
    let cancel = CancellationToken::new();
    let id = pipeline
        .ingest(&ImageRef::url(CAT), Metadata::default(), &cancel)
        .await
        .unwrap();

    fake.fail_next(SearchError::upstream("embedding service", "502"));
    let result = pipeline.reembed(id, &ImageRef::url(CAT), &cancel).await;

    assert!(matches!(result, Err(SearchError::EmbeddingFailure(_))));
    assert!(store.get(id).await.unwrap().is_some());
}

/// Delegates to an in-memory store but refuses to delete `locked`.
struct LockedEntity {
    inner: InMemoryStore,
    locked: EntityId,
}

#[async_trait]
impl VectorStore for LockedEntity {
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn name(&self) -> &'static str {
        "locked"
    }

    async fn insert(&self, entity: NewEntity) -> Result<EntityId> {
        self.inner.insert(entity).await
    }

    async fn delete(&self, id: EntityId) -> Result<()> {
        if id == self.locked {
            return Err(SearchError::upstream("vector store", "row is locked"));
        }
        self.inner.delete(id).await
    }

    async fn get(&self, id: EntityId) -> Result<Option<IndexedEntity>> {
        self.inner.get(id).await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }

    async fn query_nearest(&self, embedding: &[f32], limit: usize) -> Result<Vec<Neighbor>> {
        self.inner.query_nearest(embedding, limit).await
    }

    async fn query_ranked(&self, query: RankedQuery<'_>) -> Result<Vec<RankedRow>> {
        self.inner.query_ranked(query).await
    }
}

#[tokio::test]
async fn test_reembed_rolls_back_when_old_entity_cannot_be_removed() {
    let inner = InMemoryStore::new(4).unwrap();
    let old = inner
        .insert(NewEntity {
            vector: vec![1.0, 0.0, 0.0, 0.0],
            metadata: Metadata::default().with("title", "cat".into()),
        })
        .await
        .unwrap();
    let store = Arc::new(LockedEntity { inner, locked: old });
    let embedder: Arc<dyn EmbeddingClient> = Arc::new(FakeEmbedder::new(4));
    let pipeline = IngestionPipeline::new(embedder, store.clone(), Duration::from_secs(1));
    let cancel = CancellationToken::new();

    for _ in 0..2 {
        let result = pipeline.reembed(old, &ImageRef::url(CAT), &cancel).await;
        assert!(matches!(result, Err(SearchError::Upstream { .. })));
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get(old).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_remove_twice_succeeds() {
    let (_, store, pipeline) = setup(FakeEmbedder::new(4));
    let id = pipeline
        .ingest(&ImageRef::url(CAT), Metadata::default(), &CancellationToken::new())
        .await
        .unwrap();

    pipeline.remove(id).await.unwrap();
    pipeline.remove(id).await.unwrap();
    pipeline.remove(9_999).await.unwrap();
    assert_eq!(store.len().await.unwrap(), 0);
}
