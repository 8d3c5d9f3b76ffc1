use crate::utils::errors::SearchError;
use crate::utils::types::{Distance, Score, SCORE_DECIMALS};

/// Cosine distance: 1 - cosine similarity.
///
/// Accumulates in f64 so that ties between stored vectors are decided by the
/// same arithmetic every time. A zero vector has no direction and is treated
/// as orthogonal to everything (distance 1).
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<Distance, SearchError> {
    if a.len() != b.len() {
        return Err(SearchError::wrong_dimension(a.len(), b.len()));
    }

    let (dot, norm_a, norm_b) = a.iter().zip(b.iter()).fold(
        (0.0f64, 0.0f64, 0.0f64),
        |(dot, na, nb), (&x, &y)| {
            let (x, y) = (f64::from(x), f64::from(y));
            (dot + x * y, na + x * x, nb + y * y)
        },
    );

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(1.0);
    }

    Ok(1.0 - dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Similarity derived from a cosine distance.
pub fn similarity(distance: Distance) -> Score {
    1.0 - distance
}

/// Strict threshold check. NaN distances never pass.
pub fn passes_threshold(distance: Distance, min_similarity: Score) -> bool {
    similarity(distance) > min_similarity
}

/// Score as shown to callers: clamped to `[0, 1]` and rounded.
pub fn display_score(score: Score) -> Score {
    let factor = 10f64.powi(SCORE_DECIMALS);
    (score.clamp(0.0, 1.0) * factor).round() / factor
}

/// Unit-length copy of `v`; zero vectors are returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}
