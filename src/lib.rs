//! Similarity search over image embeddings.
//!
//! Images are embedded by a CLIP-style service, kept in a vector store
//! together with free-form metadata, and queried by text or by image. Results
//! come back as stable pages: every match above the similarity threshold gets
//! a dense 1-based rank, and page `p` of size `n` holds ranks
//! `(p - 1) * n + 1 ..= p * n`.

pub mod api;
pub mod embedding;
pub mod ingest;
pub mod payload_storage;
pub mod ranking;
pub mod segment;
pub mod store;
pub mod utils;
pub mod vector;

pub use embedding::{EmbeddingClient, ImageRef};
pub use ingest::IngestionPipeline;
pub use ranking::{RankingEngine, SearchPage, SearchParams, SimilarityResult};
pub use store::VectorStore;
pub use utils::errors::{Result, SearchError};
