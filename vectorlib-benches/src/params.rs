//! Benchmark parameter labels.

use std::fmt;

/// Parameters identifying one build benchmark.
#[derive(Clone, Debug)]
pub struct BuildBenchParams {
    /// Number of points inserted.
    pub point_count: usize,
    /// Neighbour cap `M`.
    pub max_connections: usize,
}

impl fmt::Display for BuildBenchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n={},M={}", self.point_count, self.max_connections)
    }
}

/// Parameters identifying one query benchmark.
#[derive(Clone, Debug)]
pub struct QueryBenchParams {
    /// Query breadth.
    pub ef: usize,
    /// Neighbours requested.
    pub k: usize,
}

impl fmt::Display for QueryBenchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ef={},k={}", self.ef, self.k)
    }
}
