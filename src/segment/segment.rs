use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::payload_storage::filters::{Filter, evaluate_filter};
use crate::ranking::page::{Neighbor, RankRange, RankedNeighbor, nearest, rank_neighbors, select_page};
use crate::utils::errors::SearchError;
use crate::utils::metadata::Metadata;
use crate::utils::types::{EntityId, Embedding, Score};
use crate::vector::metric::cosine_distance;

const MIN_DELETIONS_BEFORE_PURGE: usize = 100;
const MAX_DELETION_RATIO: f32 = 0.25;

/// A segment is the in-memory unit that owns vectors, their metadata and
/// deletion tombstones for one collection of fixed dimension.
pub struct Segment {
    dim: usize,
    vectors: BTreeMap<EntityId, Embedding>,
    metadata: HashMap<EntityId, Metadata>,
    // Tombstoned ids still present in `vectors` until the next purge.
    deleted: HashSet<EntityId>,
    next_id: EntityId,
}

impl Segment {
    pub fn new(dim: usize) -> Result<Self, SearchError> {
        if dim == 0 {
            return Err(SearchError::validation("collection dimension must be positive"));
        }
        Ok(Self {
            dim,
            vectors: BTreeMap::new(),
            metadata: HashMap::new(),
            deleted: HashSet::new(),
            next_id: 1,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Insert a new vector with its metadata. Auto-generates the id.
    ///
    /// All checks run before anything is written, so a rejected insert
    /// leaves the segment untouched.
    pub fn insert(&mut self, vector: Embedding, metadata: Metadata) -> Result<EntityId, SearchError> {
        self.check_vector(&vector)?;

        let id = self.next_id;
        self.vectors.insert(id, vector);
        self.metadata.insert(id, metadata);
        self.next_id += 1;
        Ok(id)
    }

    /// Get the vector for an id, if it exists and is not deleted.
    pub fn get_vector(&self, id: EntityId) -> Option<&Embedding> {
        if self.deleted.contains(&id) {
            return None;
        }
        self.vectors.get(&id)
    }

    pub fn get_metadata(&self, id: EntityId) -> Option<&Metadata> {
        if self.deleted.contains(&id) {
            return None;
        }
        self.metadata.get(&id)
    }

    /// Tombstones an entity. Returns whether anything was live under `id`;
    /// unknown or already deleted ids are a no-op.
    pub fn delete(&mut self, id: EntityId) -> bool {
        if self.deleted.contains(&id) || !self.vectors.contains_key(&id) {
            return false;
        }

        self.deleted.insert(id);

        let deleted_count = self.deleted.len();
        let total_count = self.vectors.len();
        if deleted_count >= MIN_DELETIONS_BEFORE_PURGE
            && (deleted_count as f32 / total_count as f32) >= MAX_DELETION_RATIO
        {
            debug!(deleted_count, total_count, "purging tombstoned entities");
            self.purge();
        }

        true
    }

    /// Physically drops every tombstoned entity.
    pub fn purge(&mut self) {
        for id in self.deleted.drain() {
            self.vectors.remove(&id);
            self.metadata.remove(&id);
        }
    }

    pub fn is_deleted(&self, id: EntityId) -> bool {
        self.deleted.contains(&id)
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.vectors.len() - self.deleted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tombstones not yet purged.
    pub fn pending_deletions(&self) -> usize {
        self.deleted.len()
    }

    /// The `limit` nearest live entities in ascending distance, ties by id.
    pub fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Neighbor>, SearchError> {
        let scored = self.scan(query, None)?;
        Ok(nearest(scored, limit))
    }

    /// Threshold, filter, rank and page selection in one pass over a
    /// consistent view of the segment.
    pub fn ranked(
        &self,
        query: &[f32],
        min_similarity: Score,
        filter: Option<&Filter>,
        range: RankRange,
    ) -> Result<Vec<RankedNeighbor>, SearchError> {
        let scored = self.scan(query, filter)?;
        let ranked = rank_neighbors(scored, min_similarity);
        Ok(select_page(&ranked, range))
    }

    /// Distances from `query` to every live entity matching `filter`.
    fn scan(&self, query: &[f32], filter: Option<&Filter>) -> Result<Vec<Neighbor>, SearchError> {
        if query.len() != self.dim {
            return Err(SearchError::wrong_dimension(self.dim, query.len()));
        }

        self.vectors
            .iter()
            .filter(|(id, _)| !self.deleted.contains(id))
            .filter(|(id, _)| {
                filter.is_none_or(|f| {
                    self.metadata
                        .get(id)
                        .is_some_and(|m| evaluate_filter(f, m))
                })
            })
            .map(|(&id, vector)| {
                cosine_distance(query, vector).map(|distance| Neighbor { id, distance })
            })
            .collect()
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), SearchError> {
        if vector.len() != self.dim {
            return Err(SearchError::wrong_dimension(self.dim, vector.len()));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(SearchError::validation("vector contains non-finite values"));
        }
        Ok(())
    }
}
