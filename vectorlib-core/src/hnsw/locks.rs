//! Striped mutex table serialising operations on the same label.
//!
//! Keys are hashed onto a fixed number of stripes, so unrelated labels may
//! occasionally share a stripe and contend. Only same-key exclusion is
//! guaranteed.

use std::sync::{Mutex, MutexGuard};

use crate::error::HnswError;

/// Number of stripes in a label lock table; must be a power of two.
pub(crate) const LABEL_LOCK_STRIPES: usize = 1 << 16;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;
const SPLITMIX_MULT_A: u64 = 0xBF58_476D_1CE4_E5B9;
const SPLITMIX_MULT_B: u64 = 0x94D0_49BB_1331_11EB;

#[inline]
fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(GOLDEN_GAMMA);
    state = (state ^ (state >> 30)).wrapping_mul(SPLITMIX_MULT_A);
    state = (state ^ (state >> 27)).wrapping_mul(SPLITMIX_MULT_B);
    state ^ (state >> 31)
}

#[derive(Debug)]
pub(crate) struct LockStripes {
    stripes: Box<[Mutex<()>]>,
    mask: u64,
}

impl LockStripes {
    pub(crate) fn new(stripes: usize) -> Self {
        debug_assert!(stripes.is_power_of_two());
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
            mask: stripes as u64 - 1,
        }
    }

    #[inline]
    fn stripe_of(&self, key: u64) -> usize {
        (splitmix64(key) & self.mask) as usize
    }

    /// Blocks until the stripe owning `key` is held by the caller.
    pub(crate) fn lock(&self, key: u64) -> Result<MutexGuard<'_, ()>, HnswError> {
        self.stripes[self.stripe_of(key)]
            .lock()
            .map_err(|_| HnswError::LockPoisoned {
                resource: "label stripe",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_key_maps_to_same_stripe() {
        let locks = LockStripes::new(16);
        assert_eq!(locks.stripe_of(42), locks.stripe_of(42));
        assert!(locks.stripe_of(u64::MAX) < 16);
    }

    #[test]
    fn sequential_keys_spread_across_stripes() {
        let locks = LockStripes::new(64);
        let used: std::collections::HashSet<_> = (0..256).map(|key| locks.stripe_of(key)).collect();
        assert!(used.len() > 32, "only {} stripes used", used.len());
    }

    #[test]
    fn distinct_stripes_lock_independently() {
        let locks = LockStripes::new(LABEL_LOCK_STRIPES);
        let (a, b) = (0..)
            .map(|key| (0, key))
            .find(|&(a, b)| locks.stripe_of(a) != locks.stripe_of(b))
            .expect("some key must land on another stripe");
        let _first = locks.lock(a).expect("stripe must lock");
        let _second = locks.lock(b).expect("independent stripe must lock");
    }
}
