/// The unique identifier for an entity in the vector store.
pub type EntityId = u64;

/// A fixed-length vector representing the semantic content of an image or text.
pub type Embedding = Vec<f32>;

/// Cosine distance between a query and a stored vector, in `[0, 2]`.
pub type Distance = f64;

/// Normalized similarity score, `1 - distance`.
pub type Score = f64;

/// Largest page the service will ever return.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Decimal places kept on surfaced similarity scores.
pub const SCORE_DECIMALS: i32 = 4;
