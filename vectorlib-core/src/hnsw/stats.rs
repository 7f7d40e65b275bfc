//! Cumulative query counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Totals accumulated across every query since the index was created.
///
/// A hop is one expansion of a node's neighbour list; each neighbour id
/// scanned during a hop counts as one distance computation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SearchStats {
    /// Neighbour lists expanded.
    pub hops: u64,
    /// Distances evaluated against the query.
    pub distance_computations: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    hops: AtomicU64,
    distance_computations: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn record(&self, hops: u64, distance_computations: u64) {
        self.hops.fetch_add(hops, Ordering::Relaxed);
        self.distance_computations
            .fetch_add(distance_computations, Ordering::Relaxed);
        self.export(hops, distance_computations);
    }

    pub(crate) fn snapshot(&self) -> SearchStats {
        SearchStats {
            hops: self.hops.load(Ordering::Relaxed),
            distance_computations: self.distance_computations.load(Ordering::Relaxed),
        }
    }

    #[cfg(feature = "metrics")]
    fn export(&self, hops: u64, distance_computations: u64) {
        metrics::counter!("hnsw_search_hops").increment(hops);
        metrics::counter!("hnsw_search_distance_computations").increment(distance_computations);
    }

    #[cfg(not(feature = "metrics"))]
    fn export(&self, _hops: u64, _distance_computations: u64) {}
}

/// Per-query tally flushed into the shared recorder once the query ends.
#[derive(Debug, Default)]
pub(crate) struct QueryTally {
    pub(crate) hops: u64,
    pub(crate) distance_computations: u64,
}

impl QueryTally {
    #[inline]
    pub(crate) fn hop(&mut self, neighbours: usize) {
        self.hops += 1;
        self.distance_computations += neighbours as u64;
    }
}
