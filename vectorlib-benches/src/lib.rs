//! Benchmark support crate for vectorlib.
//!
//! Provides synthetic datasets, parameter labels, and recall scoring used by
//! the Criterion benchmarks for index construction and querying.

pub mod error;
pub mod params;
pub mod recall;
pub mod source;
