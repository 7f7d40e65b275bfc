//! Vectorlib core library: an approximate nearest-neighbour index built on
//! Hierarchical Navigable Small World graphs.
#![cfg_attr(docsrs, feature(doc_cfg))]

mod error;
mod hnsw;
mod space;

pub use crate::{
    error::{HnswError, HnswErrorCode, Result},
    hnsw::{
        DEFAULT_EF, DEFAULT_RNG_SEED, HnswIndex, HnswInvariant, HnswInvariantViolation,
        HnswParams, IndexHeader, Label, LabelFilter, LoadOptions, MAX_CONNECTIONS_CAP,
        SearchResult, SearchStats,
    },
    space::{CosineSpace, L2Space, Space, decode_f32, encode_f32},
};
