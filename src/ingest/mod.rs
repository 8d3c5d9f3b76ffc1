pub mod pipeline;

pub use pipeline::{IMAGE_URL_KEY, IngestionPipeline};
