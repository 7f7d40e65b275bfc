//! Distance spaces consumed by the HNSW index.
//!
//! A [`Space`] interprets the opaque, fixed-width byte blobs stored in the
//! node arena. The built-in spaces read little-endian `f32` components and
//! expose their byte width so the index can size its records.

mod cosine;
mod helpers;
mod l2;

pub use self::cosine::CosineSpace;
pub use self::helpers::{decode_f32, encode_f32};
pub use self::l2::L2Space;

/// Capability to compare two fixed-width vectors.
///
/// Implementations must be pure and deterministic: the same two inputs always
/// produce the same non-negative distance, where lower means more similar.
/// Passing buffers whose length differs from [`Space::data_size`] is a caller
/// error and yields an unspecified distance rather than a failure.
///
/// # Examples
/// ```
/// use vectorlib_core::{L2Space, Space, encode_f32};
///
/// let space = L2Space::new(2);
/// let a = encode_f32(&[0.0, 0.0]);
/// let b = encode_f32(&[3.0, 4.0]);
/// assert_eq!(space.data_size(), 8);
/// assert_eq!(space.distance(&a, &b), 25.0);
/// ```
pub trait Space: Send + Sync {
    /// Returns the byte width of one stored vector.
    fn data_size(&self) -> usize;

    /// Returns the dimensionality this space was configured with.
    fn dimension(&self) -> usize;

    /// Computes the distance between two vectors of [`Space::data_size`] bytes.
    fn distance(&self, left: &[u8], right: &[u8]) -> f32;

    /// Returns a short name used in diagnostics.
    fn name(&self) -> &'static str;
}

impl<S: Space + ?Sized> Space for &S {
    fn data_size(&self) -> usize {
        (**self).data_size()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn distance(&self, left: &[u8], right: &[u8]) -> f32 {
        (**self).distance(left, right)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<S: Space + ?Sized> Space for Box<S> {
    fn data_size(&self) -> usize {
        (**self).data_size()
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn distance(&self, left: &[u8], right: &[u8]) -> f32 {
        (**self).distance(left, right)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
