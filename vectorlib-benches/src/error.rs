//! Benchmark setup error type.
//!
//! Lets setup helpers propagate failures with `?` instead of `.expect()`.

use vectorlib_core::HnswError;

/// Errors that may occur during benchmark setup.
#[derive(Debug, thiserror::Error)]
pub enum BenchSetupError {
    /// Index construction, insertion, or search failed.
    #[error("HNSW operation failed: {0}")]
    Hnsw(#[from] HnswError),
    /// A dataset was requested with no points or no dimensions.
    #[error("expected a non-zero value for {context}")]
    ZeroValue {
        /// The parameter that was unexpectedly zero.
        context: &'static str,
    },
}
