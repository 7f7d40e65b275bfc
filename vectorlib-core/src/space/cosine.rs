use super::{
    Space,
    helpers::{COMPONENT_BYTES, components},
};

/// Cosine distance (`1 - cos θ`) over `dim` little-endian `f32` components.
///
/// Accumulation happens in `f64`. A zero-magnitude operand has no direction,
/// so its distance to anything is 1.0, the same as an orthogonal pair.
///
/// # Examples
/// ```
/// use vectorlib_core::{CosineSpace, Space, encode_f32};
///
/// let space = CosineSpace::new(3);
/// let a = encode_f32(&[1.0, 0.0, 0.0]);
/// let b = encode_f32(&[0.0, 1.0, 0.0]);
/// assert!((space.distance(&a, &b) - 1.0).abs() < 1e-6);
/// assert!(space.distance(&a, &a).abs() < 1e-6);
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CosineSpace {
    dim: usize,
}

impl CosineSpace {
    /// Creates a space for vectors with `dim` components.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Space for CosineSpace {
    fn data_size(&self) -> usize {
        self.dim * COMPONENT_BYTES
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn distance(&self, left: &[u8], right: &[u8]) -> f32 {
        let mut dot = 0.0f64;
        let mut left_squares = 0.0f64;
        let mut right_squares = 0.0f64;
        for (l, r) in components(left).zip(components(right)) {
            let (l, r) = (f64::from(l), f64::from(r));
            dot += l * r;
            left_squares += l * l;
            right_squares += r * r;
        }

        let denominator = left_squares.sqrt() * right_squares.sqrt();
        if denominator == 0.0 {
            return 1.0;
        }
        // Theoretical range is [-1, 1], but numerical noise can spill over.
        let similarity = (dot / denominator).clamp(-1.0, 1.0);
        (1.0 - similarity) as f32
    }

    fn name(&self) -> &'static str {
        "cosine"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::encode_f32;

    use rstest::rstest;

    #[rstest]
    #[case(&[1.0, 0.0], &[0.0, 1.0], 1.0)]
    #[case(&[1.0, 1.0], &[2.0, 2.0], 0.0)]
    #[case(&[1.0, 0.0], &[-1.0, 0.0], 2.0)]
    #[case(&[0.0, 0.0], &[1.0, 0.0], 1.0)]
    fn cosine_distance(#[case] left: &[f32], #[case] right: &[f32], #[case] expected: f32) {
        let space = CosineSpace::new(2);
        let distance = space.distance(&encode_f32(left), &encode_f32(right));
        assert!((distance - expected).abs() < 1e-6, "got {distance}");
    }

    #[test]
    fn distance_is_never_negative() {
        let space = CosineSpace::new(3);
        let a = encode_f32(&[0.3, 0.3, 0.3]);
        assert!(space.distance(&a, &a) >= 0.0);
    }
}
