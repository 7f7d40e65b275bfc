//! Concurrent Hierarchical Navigable Small World (HNSW) graph.
//!
//! Nodes live in a fixed-capacity arena addressed by dense 32-bit ids.
//! Writers serialise on per-node link locks and a striped label lock;
//! queries traverse the graph without taking link locks.

mod arena;
mod heuristic;
mod index;
mod insert;
mod invariants;
mod locks;
mod params;
mod persist;
mod registry;
mod search;
mod stats;
mod types;
mod visited;

/// Caller-chosen identifier attached to every stored vector.
pub type Label = u64;

pub use self::{
    index::{DEFAULT_EF, HnswIndex},
    invariants::{HnswInvariant, HnswInvariantViolation},
    params::{DEFAULT_RNG_SEED, HnswParams, MAX_CONNECTIONS_CAP},
    persist::{IndexHeader, LoadOptions},
    stats::SearchStats,
    types::{LabelFilter, SearchResult},
};

#[cfg(test)]
mod tests;
