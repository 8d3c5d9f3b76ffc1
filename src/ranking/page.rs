//! Pure ranking and page-selection rules shared by every store.
//!
//! The total order is ascending cosine distance with ascending entity id as
//! the tie-breaker; ranks are dense and 1-based over the entries that pass
//! the similarity threshold.

use std::cmp::Ordering;

use itertools::Itertools;
use ordered_float::OrderedFloat;

use crate::utils::errors::SearchError;
use crate::utils::types::{Distance, EntityId, MAX_PAGE_SIZE, Score};
use crate::vector::metric::passes_threshold;

/// A stored entity's distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: EntityId,
    pub distance: Distance,
}

/// A neighbor with its position in the total order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedNeighbor {
    pub id: EntityId,
    pub distance: Distance,
    pub rank: u64,
}

/// Closed interval of ranks, `first..=last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankRange {
    pub first: u64,
    pub last: u64,
}

impl RankRange {
    pub fn contains(&self, rank: u64) -> bool {
        self.first <= rank && rank <= self.last
    }

    /// Number of ranks covered; never zero.
    pub fn width(&self) -> u64 {
        self.last + 1 - self.first
    }
}

/// A validated page request: `page >= 1`, `page_size` clamped to `[1, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
    page_size: u32,
}

impl PageRequest {
    pub fn new(page: u32, page_size: u32) -> Result<Self, SearchError> {
        Self::with_max(page, page_size, MAX_PAGE_SIZE)
    }

    /// Like [`PageRequest::new`] with a deployment-specific cap, itself capped
    /// at [`MAX_PAGE_SIZE`].
    pub fn with_max(page: u32, page_size: u32, max_page_size: u32) -> Result<Self, SearchError> {
        if page == 0 {
            return Err(SearchError::validation("page must be >= 1"));
        }
        let cap = max_page_size.clamp(1, MAX_PAGE_SIZE);
        Ok(Self {
            page,
            page_size: page_size.clamp(1, cap),
        })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Ranks `[(p-1)*n + 1, p*n]`.
    pub fn ranks(&self) -> RankRange {
        let n = u64::from(self.page_size);
        let p = u64::from(self.page);
        RankRange {
            first: (p - 1) * n + 1,
            last: p * n,
        }
    }
}

/// The total order used everywhere: distance ascending, then id ascending.
/// NaN distances sort last.
pub fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    OrderedFloat(a.distance)
        .cmp(&OrderedFloat(b.distance))
        .then_with(|| a.id.cmp(&b.id))
}

/// Drops neighbors at or below `min_similarity`, sorts the rest and assigns
/// dense 1-based ranks.
pub fn rank_neighbors<I>(neighbors: I, min_similarity: Score) -> Vec<RankedNeighbor>
where
    I: IntoIterator<Item = Neighbor>,
{
    neighbors
        .into_iter()
        .filter(|n| passes_threshold(n.distance, min_similarity))
        .sorted_by(compare_neighbors)
        .enumerate()
        .map(|(idx, n)| RankedNeighbor {
            id: n.id,
            distance: n.distance,
            rank: idx as u64 + 1,
        })
        .collect()
}

/// Entries whose rank lies inside `range`.
pub fn select_page(ranked: &[RankedNeighbor], range: RankRange) -> Vec<RankedNeighbor> {
    ranked
        .iter()
        .filter(|r| range.contains(r.rank))
        .copied()
        .collect()
}

/// The `limit` nearest neighbors in total order, without any threshold.
pub fn nearest<I>(neighbors: I, limit: usize) -> Vec<Neighbor>
where
    I: IntoIterator<Item = Neighbor>,
{
    neighbors
        .into_iter()
        .k_smallest_by(limit, compare_neighbors)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(id: EntityId, distance: Distance) -> Neighbor {
        Neighbor { id, distance }
    }

    #[test]
    fn ranks_are_dense_and_tie_broken_by_id() {
        let ranked = rank_neighbors(vec![n(9, 0.2), n(3, 0.2), n(5, 0.1)], 0.0);
        let order: Vec<_> = ranked.iter().map(|r| (r.id, r.rank)).collect();
        assert_eq!(order, vec![(5, 1), (3, 2), (9, 3)]);
    }

    #[test]
    fn threshold_is_strict() {
        // similarity exactly 0.5 is excluded
        let ranked = rank_neighbors(vec![n(1, 0.5), n(2, 0.4)], 0.5);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, 2);
    }

    #[test]
    fn nan_distances_never_rank() {
        let ranked = rank_neighbors(vec![n(1, f64::NAN), n(2, 0.0)], 0.0);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, 2);
    }

    #[test]
    fn page_ranges_are_inclusive() {
        let req = PageRequest::new(3, 10).unwrap();
        assert_eq!(req.ranks(), RankRange { first: 21, last: 30 });
        assert_eq!(req.ranks().width(), 10);
    }

    #[test]
    fn page_size_is_clamped() {
        assert_eq!(PageRequest::new(1, 0).unwrap().page_size(), 1);
        assert_eq!(PageRequest::new(1, 500).unwrap().page_size(), MAX_PAGE_SIZE);
        assert_eq!(PageRequest::with_max(1, 50, 20).unwrap().page_size(), 20);
        assert_eq!(PageRequest::with_max(1, 500, 1000).unwrap().page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn page_zero_is_rejected() {
        assert!(matches!(
            PageRequest::new(0, 10),
            Err(SearchError::Validation(_))
        ));
    }

    #[test]
    fn nearest_keeps_total_order() {
        let result = nearest(vec![n(4, 0.3), n(2, 0.3), n(1, 0.9), n(7, 0.0)], 3);
        let ids: Vec<_> = result.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![7, 2, 4]);
    }
}
