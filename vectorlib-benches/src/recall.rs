//! Recall measurement against an exhaustive scan.

use std::collections::HashSet;

use vectorlib_core::{Label, SearchResult, Space, encode_f32};

/// Integer recall score; convert to a fraction only when reporting.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecallScore {
    /// True neighbours the approximate search returned.
    pub hits: usize,
    /// Neighbours that could have been found.
    pub total: usize,
}

impl RecallScore {
    /// Adds another query's score.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            hits: self.hits + other.hits,
            total: self.total + other.total,
        }
    }
}

/// Exact `k` nearest labels of `query` over `vectors`, closest first.
///
/// Ties are broken by label.
#[must_use]
pub fn brute_force_top_k(
    space: &impl Space,
    vectors: &[Vec<f32>],
    query: &[f32],
    k: usize,
) -> Vec<Label> {
    let query = encode_f32(query);
    let mut scored: Vec<(f32, Label)> = vectors
        .iter()
        .enumerate()
        .map(|(label, vector)| (space.distance(&query, &encode_f32(vector)), label as Label))
        .collect();
    scored.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.truncate(k);
    scored.into_iter().map(|(_, label)| label).collect()
}

/// Scores `observed` against the exact neighbours in `oracle`.
///
/// # Examples
/// ```
/// use vectorlib_benches::recall::{RecallScore, recall_at_k};
/// use vectorlib_core::SearchResult;
///
/// let observed = [
///     SearchResult { distance: 0.1, label: 3 },
///     SearchResult { distance: 0.4, label: 8 },
/// ];
/// let score = recall_at_k(&[3, 5], &observed, 2);
/// assert_eq!(score, RecallScore { hits: 1, total: 2 });
/// ```
#[must_use]
pub fn recall_at_k(oracle: &[Label], observed: &[SearchResult], k: usize) -> RecallScore {
    let truth: HashSet<Label> = oracle.iter().take(k).copied().collect();
    let hits = observed
        .iter()
        .take(k)
        .filter(|hit| truth.contains(&hit.label))
        .count();
    RecallScore {
        hits,
        total: truth.len(),
    }
}
