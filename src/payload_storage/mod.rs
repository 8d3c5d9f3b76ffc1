pub mod filters;

pub use filters::{Filter, evaluate_filter};
