//! Integration tests for the HNSW index.

mod concurrency;
mod persist;
mod recall;
