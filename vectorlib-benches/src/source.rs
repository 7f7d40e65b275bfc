//! Deterministic synthetic datasets.

use rand::{Rng, SeedableRng, rngs::SmallRng};
use vectorlib_core::{HnswIndex, HnswParams, L2Space, Label, encode_f32};

use crate::error::BenchSetupError;

/// Shape and seed of a generated dataset.
#[derive(Clone, Copy, Debug)]
pub struct SyntheticConfig {
    /// Number of vectors.
    pub point_count: usize,
    /// Components per vector.
    pub dimensions: usize,
    /// Seed of the component generator.
    pub seed: u64,
}

/// Vectors drawn uniformly from the unit hypercube `[0, 1)^d`.
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    dimensions: usize,
    vectors: Vec<Vec<f32>>,
}

impl SyntheticSource {
    /// Generates the dataset described by `config`.
    ///
    /// # Errors
    /// Returns [`BenchSetupError::ZeroValue`] when the point count or the
    /// dimensionality is zero.
    pub fn generate(config: &SyntheticConfig) -> Result<Self, BenchSetupError> {
        if config.point_count == 0 {
            return Err(BenchSetupError::ZeroValue {
                context: "point_count",
            });
        }
        if config.dimensions == 0 {
            return Err(BenchSetupError::ZeroValue {
                context: "dimensions",
            });
        }
        let mut rng = SmallRng::seed_from_u64(config.seed);
        let vectors = (0..config.point_count)
            .map(|_| (0..config.dimensions).map(|_| rng.r#gen::<f32>()).collect())
            .collect();
        Ok(Self {
            dimensions: config.dimensions,
            vectors,
        })
    }

    /// Components per vector.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Generated vectors in label order.
    #[must_use]
    pub fn vectors(&self) -> &[Vec<f32>] {
        &self.vectors
    }

    /// Encoded `(label, bytes)` pairs ready for [`HnswIndex::add_batch`].
    #[must_use]
    pub fn items(&self) -> Vec<(Label, Vec<u8>)> {
        self.vectors
            .iter()
            .enumerate()
            .map(|(label, vector)| (label as Label, encode_f32(vector)))
            .collect()
    }

    /// Builds an L2 index holding every vector.
    ///
    /// # Errors
    /// Propagates construction and insertion failures.
    pub fn build_index(&self, params: HnswParams) -> Result<HnswIndex<L2Space>, BenchSetupError> {
        let index = HnswIndex::new(L2Space::new(self.dimensions), self.vectors.len(), params)?;
        index.add_batch(&self.items())?;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    fn generation_is_deterministic() {
        let config = SyntheticConfig {
            point_count: 8,
            dimensions: 3,
            seed: 4,
        };
        let first = SyntheticSource::generate(&config).expect("generation must succeed");
        let second = SyntheticSource::generate(&config).expect("generation must succeed");
        assert_eq!(first.vectors(), second.vectors());
        assert!(first.vectors().iter().flatten().all(|v| (0.0..1.0).contains(v)));
    }

    #[rstest]
    #[case(0, 3, "point_count")]
    #[case(3, 0, "dimensions")]
    fn zero_sizes_are_rejected(
        #[case] point_count: usize,
        #[case] dimensions: usize,
        #[case] expected: &str,
    ) {
        let err = SyntheticSource::generate(&SyntheticConfig {
            point_count,
            dimensions,
            seed: 1,
        })
        .expect_err("zero sizes must fail");
        assert!(matches!(err, BenchSetupError::ZeroValue { context } if context == expected));
    }
}
