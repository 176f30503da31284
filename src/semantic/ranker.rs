//! Exhaustive top-K ranking of a corpus against a query vector.
//!
//! The corpus is small (tens to hundreds of items), so every item is scored
//! and sorted; no index structure is kept.

use std::cmp::Ordering;

use crate::semantic::similarity::cosine_similarity;
use crate::semantic::types::{EmbeddingItem, RankedResult};

/// Default number of results returned by a search
pub const DEFAULT_TOP_K: usize = 8;

/// Score floor that keeps every finite cosine value
pub const NO_SCORE_FLOOR: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankOptions {
    /// Maximum number of results. Zero returns nothing.
    pub top_k: usize,
    /// Inclusive lower bound on the similarity score
    pub min_score: f32,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_score: NO_SCORE_FLOOR,
        }
    }
}

impl RankOptions {
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }
}

/// Rank `items` by cosine similarity to `query`.
///
/// Items with a non-finite score or a score below `min_score` are dropped.
/// The sort is stable, so equal scores keep their corpus order. `items` is
/// only read; returned results own clones of the selected items.
pub fn rank(query: &[f32], items: &[EmbeddingItem], options: RankOptions) -> Vec<RankedResult> {
    if options.top_k == 0 || items.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| (idx, cosine_similarity(query, &item.embedding)))
        .filter(|(_, score)| score.is_finite() && *score >= options.min_score)
        .collect();

    // Vec::sort_by is stable
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(options.top_k);

    scored
        .into_iter()
        .map(|(idx, score)| RankedResult {
            item: items[idx].clone(),
            score,
        })
        .collect()
}
