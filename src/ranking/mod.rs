pub mod engine;
pub mod page;

pub use engine::{EngineSettings, RankingEngine, SearchPage, SearchParams, SimilarityResult};
pub use page::{Neighbor, PageRequest, RankRange, RankedNeighbor};
