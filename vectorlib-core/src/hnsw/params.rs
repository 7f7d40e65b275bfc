//! Construction parameters for the HNSW index.

use tracing::warn;

use crate::error::HnswError;

/// Upper bound applied to `max_connections`; larger requests are clamped.
pub const MAX_CONNECTIONS_CAP: usize = 10_000;

/// Highest layer a node may reach. Draws for any valid `M` stay far below it.
pub(crate) const MAX_LEVEL: usize = 64;

/// Seed used for level sampling when none is supplied.
pub const DEFAULT_RNG_SEED: u64 = 100;

const DEFAULT_MAX_CONNECTIONS: usize = 16;
const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Configuration parameters fixed when an index is created.
///
/// `M` bounds the neighbour lists on upper layers and `M0 = 2M` bounds the
/// base layer. Node levels are drawn as `floor(-ln(U) / ln(M))`.
#[derive(Clone, Debug, PartialEq)]
pub struct HnswParams {
    max_connections: usize,
    ef_construction: usize,
    level_multiplier: f64,
    rng_seed: u64,
    allow_replace_deleted: bool,
}

impl HnswParams {
    /// Creates a parameter set with explicit neighbour and construction widths.
    ///
    /// `max_connections` above [`MAX_CONNECTIONS_CAP`] is clamped with a
    /// warning, and `ef_construction` is raised to at least `max_connections`.
    ///
    /// # Errors
    /// Returns [`HnswError::InvalidParameters`] when `max_connections` is
    /// smaller than two, because the level multiplier `1 / ln(M)` is undefined
    /// or negative below that.
    ///
    /// # Examples
    /// ```
    /// use vectorlib_core::HnswParams;
    ///
    /// let params = HnswParams::new(8, 4).expect("parameters must be valid");
    /// assert_eq!(params.max_connections(), 8);
    /// assert_eq!(params.max_connections_level0(), 16);
    /// assert_eq!(params.ef_construction(), 8);
    /// ```
    pub fn new(max_connections: usize, ef_construction: usize) -> Result<Self, HnswError> {
        if max_connections < 2 {
            return Err(HnswError::InvalidParameters {
                reason: format!("max_connections ({max_connections}) must be at least 2"),
            });
        }
        let max_connections = if max_connections > MAX_CONNECTIONS_CAP {
            warn!(
                requested = max_connections,
                cap = MAX_CONNECTIONS_CAP,
                "max_connections exceeds the supported cap; clamping"
            );
            MAX_CONNECTIONS_CAP
        } else {
            max_connections
        };
        Ok(Self::from_parts(
            max_connections,
            ef_construction.max(max_connections),
        ))
    }

    fn from_parts(max_connections: usize, ef_construction: usize) -> Self {
        Self {
            max_connections,
            ef_construction,
            level_multiplier: Self::multiplier_for(max_connections),
            rng_seed: DEFAULT_RNG_SEED,
            allow_replace_deleted: false,
        }
    }

    /// Returns `1 / ln(M)`, the level multiplier paired with `max_connections`.
    pub(crate) fn multiplier_for(max_connections: usize) -> f64 {
        (max_connections as f64).ln().recip()
    }

    /// Restores a parameter set from persisted header fields.
    pub(crate) fn restored(
        max_connections: usize,
        ef_construction: usize,
        level_multiplier: f64,
    ) -> Self {
        Self {
            level_multiplier,
            ..Self::from_parts(max_connections, ef_construction)
        }
    }

    /// Seeds the level generator to make single-threaded builds reproducible.
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = seed;
        self
    }

    /// Allows insertions to reuse the slots of deleted elements.
    #[must_use]
    pub fn with_replace_deleted(mut self, allow: bool) -> Self {
        self.allow_replace_deleted = allow;
        self
    }

    /// Returns `M`, the neighbour cap on layers above zero.
    #[must_use]
    #[rustfmt::skip]
    pub fn max_connections(&self) -> usize { self.max_connections }

    /// Returns `M0 = 2M`, the neighbour cap on layer zero.
    #[must_use]
    #[rustfmt::skip]
    pub fn max_connections_level0(&self) -> usize { self.max_connections * 2 }

    /// Returns the construction search breadth (`ef_construction`).
    #[must_use]
    #[rustfmt::skip]
    pub fn ef_construction(&self) -> usize { self.ef_construction }

    /// Returns the multiplier applied to `-ln(U)` when sampling levels.
    #[must_use]
    #[rustfmt::skip]
    pub fn level_multiplier(&self) -> f64 { self.level_multiplier }

    /// Returns the level generator seed.
    #[must_use]
    #[rustfmt::skip]
    pub fn rng_seed(&self) -> u64 { self.rng_seed }

    /// Reports whether deleted slots may be reused by insertions.
    #[must_use]
    #[rustfmt::skip]
    pub fn allow_replace_deleted(&self) -> bool { self.allow_replace_deleted }

    /// Returns the cap for the neighbour list at `layer`.
    #[inline]
    pub(crate) fn cap_for_layer(&self, layer: usize) -> usize {
        if layer == 0 {
            self.max_connections_level0()
        } else {
            self.max_connections
        }
    }

    /// Maps a uniform draw in `[0, 1)` to a node level.
    pub(crate) fn level_for_draw(&self, draw: f64) -> usize {
        let clamped = draw.clamp(1.0e-12, 1.0 - f64::EPSILON);
        let level = (-clamped.ln() * self.level_multiplier)
            .floor()
            .min(MAX_LEVEL as f64);
        // Clamped to `MAX_LEVEL`, so the cast cannot truncate.
        level as usize
    }
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::from_parts(DEFAULT_MAX_CONNECTIONS, DEFAULT_EF_CONSTRUCTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(0)]
    #[case(1)]
    fn rejects_degenerate_fan_out(#[case] m: usize) {
        let err = HnswParams::new(m, 10).expect_err("M below two must be rejected");
        match err {
            HnswError::InvalidParameters { .. } => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn clamps_oversized_fan_out() {
        let params = HnswParams::new(MAX_CONNECTIONS_CAP + 5, 1).expect("params must be valid");
        assert_eq!(params.max_connections(), MAX_CONNECTIONS_CAP);
        assert_eq!(params.ef_construction(), MAX_CONNECTIONS_CAP);
    }

    #[test]
    fn defaults_match_documented_values() {
        let params = HnswParams::default();
        assert_eq!(params.max_connections(), 16);
        assert_eq!(params.max_connections_level0(), 32);
        assert_eq!(params.ef_construction(), 200);
        assert_eq!(params.rng_seed(), DEFAULT_RNG_SEED);
        assert!(!params.allow_replace_deleted());
        assert!((params.level_multiplier() - 1.0 / 16f64.ln()).abs() < 1e-12);
    }

    #[rstest]
    #[case(0.999_999, 0)]
    #[case(0.05, 1)]
    #[case(1.0 / 300.0, 2)]
    fn level_follows_exponential_draw(#[case] draw: f64, #[case] expected: usize) {
        let params = HnswParams::new(16, 32).expect("params must be valid");
        assert_eq!(params.level_for_draw(draw), expected);
    }

    #[test]
    fn zero_draw_is_clamped_to_a_finite_level() {
        let params = HnswParams::new(2, 2).expect("params must be valid");
        assert!(params.level_for_draw(0.0) < MAX_LEVEL);
    }

    #[test]
    fn oversized_multiplier_saturates_at_the_level_ceiling() {
        let params = HnswParams::restored(4, 8, 1.0e300);
        assert_eq!(params.level_for_draw(0.5), MAX_LEVEL);
        assert_eq!(params.level_for_draw(0.0), MAX_LEVEL);
    }
}
