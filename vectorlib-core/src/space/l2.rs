use super::{
    Space,
    helpers::{COMPONENT_BYTES, components},
};

/// Squared Euclidean distance over `dim` little-endian `f32` components.
///
/// The square root is omitted: it preserves ordering and the index only ever
/// compares distances.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct L2Space {
    dim: usize,
}

impl L2Space {
    /// Creates a space for vectors with `dim` components.
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Space for L2Space {
    fn data_size(&self) -> usize {
        self.dim * COMPONENT_BYTES
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn distance(&self, left: &[u8], right: &[u8]) -> f32 {
        components(left)
            .zip(components(right))
            .map(|(l, r)| {
                let diff = l - r;
                diff * diff
            })
            .sum()
    }

    fn name(&self) -> &'static str {
        "l2"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::encode_f32;

    use rstest::rstest;

    #[rstest]
    #[case(&[1.0, 2.0, 3.0], &[4.0, 6.0, 8.0], 50.0)]
    #[case(&[0.5, 0.5], &[0.5, 0.5], 0.0)]
    #[case(&[-1.0], &[1.0], 4.0)]
    fn squared_euclidean(#[case] left: &[f32], #[case] right: &[f32], #[case] expected: f32) {
        let space = L2Space::new(left.len());
        let distance = space.distance(&encode_f32(left), &encode_f32(right));
        assert!((distance - expected).abs() < 1e-6, "got {distance}");
    }

    #[test]
    fn is_symmetric() {
        let space = L2Space::new(3);
        let a = encode_f32(&[0.1, 0.7, -2.0]);
        let b = encode_f32(&[1.3, -0.2, 0.4]);
        assert_eq!(space.distance(&a, &b), space.distance(&b, &a));
    }

    #[test]
    fn reports_byte_width() {
        let space = L2Space::new(16);
        assert_eq!(space.data_size(), 64);
        assert_eq!(space.dimension(), 16);
    }
}
