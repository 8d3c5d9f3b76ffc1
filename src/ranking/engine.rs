//! Turns a similarity query into one stable page of ranked results.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::embedding::{EmbeddingClient, ImageRef, cancellable, require_text};
use crate::payload_storage::filters::Filter;
use crate::ranking::page::{PageRequest, RankRange};
use crate::store::{RankedQuery, RankedRow, VectorStore, bounded};
use crate::utils::errors::{Result, SearchError};
use crate::utils::metadata::Metadata;
use crate::utils::types::{Distance, EntityId, MAX_PAGE_SIZE, Score};
use crate::vector::metric::{display_score, passes_threshold, similarity};

/// Caller-facing query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Results must score strictly above this, in `[0, 1]`.
    pub min_similarity: Score,
    /// 1-based.
    pub page: u32,
    /// Clamped to `[1, max_page_size]`.
    pub page_size: u32,
    #[serde(default)]
    pub filter: Option<Filter>,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            min_similarity: 0.0,
            page: 1,
            page_size: 20,
            filter: None,
        }
    }
}

impl SearchParams {
    pub fn page(page: u32, page_size: u32) -> Self {
        Self {
            page,
            page_size,
            ..Self::default()
        }
    }

    pub fn min_similarity(mut self, min_similarity: Score) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityResult {
    pub entity_id: EntityId,
    pub raw_distance: Distance,
    /// `1 - raw_distance`, rounded for display.
    pub similarity: Score,
    pub rank: u64,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchPage {
    pub page: u32,
    pub page_size: u32,
    pub results: Vec<SimilarityResult>,
}

#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub max_page_size: u32,
    pub store_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_page_size: MAX_PAGE_SIZE,
            store_timeout: Duration::from_secs(20),
        }
    }
}

pub struct RankingEngine {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    settings: EngineSettings,
}

impl RankingEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        settings: EngineSettings,
    ) -> Result<Self> {
        if embedder.dimension() != store.dimension() {
            return Err(SearchError::validation(format!(
                "embedder {} produces {}-d vectors but store {} holds {}-d vectors",
                embedder.name(),
                embedder.dimension(),
                store.name(),
                store.dimension()
            )));
        }
        Ok(Self {
            embedder,
            store,
            settings,
        })
    }

    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    /// Ranks against a precomputed query embedding.
    pub async fn search(&self, embedding: &[f32], params: &SearchParams) -> Result<SearchPage> {
        let page = self.page_request(params)?;
        self.rank(embedding, params, page).await
    }

    pub async fn search_by_text(
        &self,
        text: &str,
        params: &SearchParams,
        cancel: &CancellationToken,
    ) -> Result<SearchPage> {
        let page = self.page_request(params)?;
        let text = require_text(text)?;
        let embedding = cancellable(cancel, self.embedder.embed_text(text)).await?;
        self.rank(&embedding, params, page).await
    }

    pub async fn search_by_image(
        &self,
        image: &ImageRef,
        params: &SearchParams,
        cancel: &CancellationToken,
    ) -> Result<SearchPage> {
        let page = self.page_request(params)?;
        image.validate()?;
        let embedding = cancellable(cancel, self.embedder.embed_image(image)).await?;
        self.rank(&embedding, params, page).await
    }

    /// Parameter checks that must pass before any network call.
    fn page_request(&self, params: &SearchParams) -> Result<PageRequest> {
        if !(0.0..=1.0).contains(&params.min_similarity) {
            return Err(SearchError::validation(format!(
                "min_similarity must be within [0, 1], got {}",
                params.min_similarity
            )));
        }
        PageRequest::with_max(params.page, params.page_size, self.settings.max_page_size)
    }

    async fn rank(
        &self,
        embedding: &[f32],
        params: &SearchParams,
        page: PageRequest,
    ) -> Result<SearchPage> {
        if embedding.len() != self.dimension() {
            return Err(SearchError::InvalidQuery(format!(
                "query embedding has {} dimensions, collection has {}",
                embedding.len(),
                self.dimension()
            )));
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(SearchError::InvalidQuery(
                "query embedding contains non-finite values".to_string(),
            ));
        }

        let ranks = page.ranks();
        let query = RankedQuery {
            embedding,
            min_similarity: params.min_similarity,
            filter: params.filter.as_ref(),
            ranks,
        };
        let rows = bounded(self.settings.store_timeout, self.store.query_ranked(query)).await?;
        let results = consistent_rows(rows, params.min_similarity, ranks);

        debug!(
            page = page.page(),
            page_size = page.page_size(),
            min_similarity = params.min_similarity,
            returned = results.len(),
            "ranked query"
        );

        if results.is_empty() {
            return Err(SearchError::NotFound { page: page.page() });
        }

        Ok(SearchPage {
            page: page.page(),
            page_size: page.page_size(),
            results,
        })
    }
}

/// Keeps the rows that honour the page contract: above the threshold, inside
/// the rank range, ranks strictly increasing and distances non-decreasing.
fn consistent_rows(
    rows: Vec<RankedRow>,
    min_similarity: Score,
    ranks: RankRange,
) -> Vec<SimilarityResult> {
    let mut results: Vec<SimilarityResult> = Vec::with_capacity(rows.len());
    for row in rows {
        let ordered = results
            .last()
            .is_none_or(|prev| row.rank > prev.rank && row.distance >= prev.raw_distance);
        if !passes_threshold(row.distance, min_similarity) || !ranks.contains(row.rank) || !ordered
        {
            warn!(
                id = row.id,
                rank = row.rank,
                distance = row.distance,
                "dropping row that violates the page contract"
            );
            continue;
        }
        results.push(SimilarityResult {
            entity_id: row.id,
            raw_distance: row.distance,
            similarity: display_score(similarity(row.distance)),
            rank: row.rank,
            metadata: row.metadata,
        });
    }
    results
}
