//! Vector similarity for semantic recall and merge-on-write

use std::cmp::Ordering;

/// Compute cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Index and similarity of the single closest candidate
pub fn closest<'a, I>(query: &[f32], candidates: I) -> Option<(usize, f32)>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    candidates
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query, v)))
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
}

/// Top-k candidate indices by similarity, highest first.
///
/// Hits below `min_similarity` are dropped. Equal similarities keep input order,
/// so callers pass candidates newest-first to break ties by recency.
pub fn top_k<'a, I>(query: &[f32], candidates: I, k: usize, min_similarity: f32) -> Vec<(usize, f32)>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut scored: Vec<(usize, f32)> = candidates
        .into_iter()
        .enumerate()
        .map(|(i, v)| (i, cosine_similarity(query, v)))
        .filter(|(_, s)| *s >= min_similarity)
        .collect();

    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}
