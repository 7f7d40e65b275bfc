//! Public entry point of the HNSW index.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use rand::{SeedableRng, rngs::SmallRng};
use tracing::instrument;

use crate::{error::HnswError, space::Space};

use super::{
    Label,
    arena::{NodeArena, RecordLayout},
    locks::{LABEL_LOCK_STRIPES, LockStripes},
    params::HnswParams,
    registry::LabelRegistry,
    stats::{SearchStats, StatsRecorder},
    types::{EntryPoint, LabelFilter, SearchResult},
    visited::VisitedPool,
};

/// Query breadth used until [`HnswIndex::set_ef`] is called.
pub const DEFAULT_EF: usize = 10;

/// Hierarchical Navigable Small World index over a [`Space`].
///
/// Every method takes `&self`: insertions, updates, deletions, and queries
/// may run concurrently from many threads. Queries read neighbour lists
/// without locking, so a query racing an insertion can observe a list being
/// rewritten and may miss or include the newest edges. Results are exact
/// with respect to the graph once writers are quiescent.
///
/// # Examples
/// ```
/// use vectorlib_core::{HnswIndex, HnswParams, L2Space, encode_f32};
///
/// let params = HnswParams::new(8, 32).expect("params must be valid");
/// let index = HnswIndex::new(L2Space::new(2), 16, params).expect("index must build");
/// for (label, point) in [[0.0, 0.0], [1.0, 0.0], [5.0, 5.0]].iter().enumerate() {
///     index
///         .add(&encode_f32(point), label as u64, false)
///         .expect("insert must succeed");
/// }
/// let hits = index
///     .search_knn_closer_first(&encode_f32(&[0.9, 0.1]), 2, None)
///     .expect("query must succeed");
/// assert_eq!(hits[0].label, 1);
/// assert_eq!(hits[1].label, 0);
/// ```
#[derive(Debug)]
pub struct HnswIndex<S> {
    pub(super) space: S,
    pub(super) params: HnswParams,
    pub(super) arena: NodeArena,
    pub(super) registry: LabelRegistry,
    pub(super) label_locks: LockStripes,
    pub(super) visited: VisitedPool,
    pub(super) global: Mutex<()>,
    pub(super) level_rng: Mutex<SmallRng>,
    pub(super) stats: StatsRecorder,
    entry: AtomicU64,
    ef: AtomicUsize,
    deleted: AtomicUsize,
}

impl<S: Space> HnswIndex<S> {
    /// Creates an empty index able to hold `max_elements` vectors.
    ///
    /// # Errors
    /// Returns [`HnswError::InvalidParameters`] when the space has a zero
    /// byte width or `max_elements` does not fit the 32-bit id range.
    #[instrument(
        name = "hnsw.new",
        skip(space, params),
        fields(space = space.name(), dim = space.dimension(), m = params.max_connections())
    )]
    pub fn new(space: S, max_elements: usize, params: HnswParams) -> Result<Self, HnswError> {
        if space.data_size() == 0 {
            return Err(HnswError::InvalidParameters {
                reason: "vector byte width must be greater than zero".into(),
            });
        }
        if max_elements >= u32::MAX as usize {
            return Err(HnswError::InvalidParameters {
                reason: format!("max_elements ({max_elements}) exceeds the 32-bit id range"),
            });
        }
        Ok(Self::with_parts(space, params, max_elements))
    }

    pub(super) fn with_parts(space: S, params: HnswParams, max_elements: usize) -> Self {
        let layout = RecordLayout::new(space.data_size(), &params);
        Self {
            arena: NodeArena::new(layout, max_elements),
            registry: LabelRegistry::default(),
            label_locks: LockStripes::new(LABEL_LOCK_STRIPES),
            visited: VisitedPool::new(max_elements),
            global: Mutex::new(()),
            level_rng: Mutex::new(SmallRng::seed_from_u64(params.rng_seed())),
            stats: StatsRecorder::default(),
            entry: AtomicU64::new(EntryPoint::pack(None)),
            ef: AtomicUsize::new(DEFAULT_EF),
            deleted: AtomicUsize::new(0),
            space,
            params,
        }
    }

    /// Inserts `vector` under `label`, or updates it in place when the label
    /// is already present. Returns the internal id of the node.
    ///
    /// With `replace_deleted`, a new label takes over the slot of a deleted
    /// element when one is vacant instead of consuming fresh capacity.
    ///
    /// # Errors
    /// - [`HnswError::VectorSize`] when `vector` has the wrong byte width.
    /// - [`HnswError::CapacityExceeded`] when a new label needs a slot and
    ///   none is left.
    /// - [`HnswError::InvalidOperation`] when `replace_deleted` is requested
    ///   but disabled in [`HnswParams`], when it is requested for an existing
    ///   label, or when updating a deleted element while replacement is
    ///   enabled.
    pub fn add(&self, vector: &[u8], label: Label, replace_deleted: bool) -> Result<u32, HnswError> {
        self.insert(vector, label, replace_deleted)
    }

    /// Inserts many `(label, vector)` pairs, in parallel when the `parallel`
    /// feature is enabled.
    ///
    /// Stops at the first failure; pairs processed before it stay inserted.
    ///
    /// # Errors
    /// Propagates the first error returned by [`HnswIndex::add`].
    #[instrument(name = "hnsw.add_batch", skip_all, fields(items = items.len()), err)]
    pub fn add_batch<V>(&self, items: &[(Label, V)]) -> Result<(), HnswError>
    where
        V: AsRef<[u8]> + Sync,
    {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;

            items
                .par_iter()
                .try_for_each(|(label, vector)| self.add(vector.as_ref(), *label, false).map(drop))
        }
        #[cfg(not(feature = "parallel"))]
        {
            items
                .iter()
                .try_for_each(|(label, vector)| self.add(vector.as_ref(), *label, false).map(drop))
        }
    }

    /// Returns the `k` nearest admissible neighbours of `query`, furthest
    /// first.
    ///
    /// Deleted elements and labels rejected by `filter` are never returned.
    /// An empty index yields an empty result.
    ///
    /// # Errors
    /// Returns [`HnswError::VectorSize`] when `query` has the wrong byte
    /// width.
    pub fn search_knn(
        &self,
        query: &[u8],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Result<Vec<SearchResult>, HnswError> {
        self.knn(query, k, filter)
    }

    /// Same as [`HnswIndex::search_knn`] with results ordered closest first.
    ///
    /// # Errors
    /// Returns [`HnswError::VectorSize`] when `query` has the wrong byte
    /// width.
    pub fn search_knn_closer_first(
        &self,
        query: &[u8],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Result<Vec<SearchResult>, HnswError> {
        let mut results = self.knn(query, k, filter)?;
        results.reverse();
        Ok(results)
    }

    /// Marks the element bound to `label` as deleted.
    ///
    /// The element stays in the graph for traversal but is excluded from
    /// results. With replacement enabled its slot becomes reusable.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels and
    /// [`HnswError::InvalidOperation`] when the element is already deleted.
    pub fn mark_deleted(&self, label: Label) -> Result<(), HnswError> {
        let _label_guard = self.label_locks.lock(label)?;
        let id = self.resolve(label)?;
        if !self.arena.mark_deleted(id) {
            return Err(HnswError::invalid_operation(format!(
                "label {label} is already deleted"
            )));
        }
        self.deleted.fetch_add(1, Ordering::AcqRel);
        if self.params.allow_replace_deleted() {
            self.registry.push_vacant(id)?;
        }
        Ok(())
    }

    /// Restores an element previously passed to [`HnswIndex::mark_deleted`].
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels and
    /// [`HnswError::InvalidOperation`] when the element is not deleted.
    pub fn unmark_deleted(&self, label: Label) -> Result<(), HnswError> {
        let _label_guard = self.label_locks.lock(label)?;
        let id = self.resolve(label)?;
        self.unmark_slot(id)
    }

    /// Reports whether the element bound to `label` is deleted.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels.
    pub fn is_deleted(&self, label: Label) -> Result<bool, HnswError> {
        Ok(self.arena.is_deleted(self.resolve(label)?))
    }

    /// Sets the query breadth `ef`; queries use `max(ef, k)`.
    pub fn set_ef(&self, ef: usize) {
        self.ef.store(ef, Ordering::Relaxed);
    }

    /// Returns the current query breadth.
    #[must_use]
    pub fn ef(&self) -> usize {
        self.ef.load(Ordering::Relaxed)
    }

    /// Number of slots in use, deleted elements included.
    #[must_use]
    #[rustfmt::skip]
    pub fn len(&self) -> usize { self.arena.len() }

    /// Returns `true` when nothing has been inserted.
    #[must_use]
    #[rustfmt::skip]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Maximum number of elements the index can hold.
    #[must_use]
    #[rustfmt::skip]
    pub fn capacity(&self) -> usize { self.arena.capacity() }

    /// Number of elements currently marked deleted.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted.load(Ordering::Acquire)
    }

    /// Highest layer in the graph, or `None` while the index is empty.
    #[must_use]
    pub fn max_level(&self) -> Option<usize> {
        self.entry_point().map(|entry| entry.level)
    }

    /// Construction parameters of the index.
    #[must_use]
    #[rustfmt::skip]
    pub fn params(&self) -> &HnswParams { &self.params }

    /// Distance space the index compares vectors with.
    #[must_use]
    #[rustfmt::skip]
    pub fn space(&self) -> &S { &self.space }

    /// Cumulative counters for every query served so far.
    #[must_use]
    pub fn search_stats(&self) -> SearchStats {
        self.stats.snapshot()
    }

    /// Reports whether `label` is bound, deleted or not.
    ///
    /// # Errors
    /// Returns [`HnswError::LockPoisoned`] when the label table is poisoned.
    pub fn contains(&self, label: Label) -> Result<bool, HnswError> {
        Ok(self.registry.get(label)?.is_some())
    }

    /// Returns a copy of the vector stored under `label`.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels.
    pub fn vector(&self, label: Label) -> Result<Vec<u8>, HnswError> {
        let id = self.resolve(label)?;
        Ok(self.arena.read_vector(id)?.to_vec())
    }

    /// Returns the highest layer the element bound to `label` occupies.
    ///
    /// # Errors
    /// Returns [`HnswError::LabelNotFound`] for unknown labels.
    pub fn node_level(&self, label: Label) -> Result<usize, HnswError> {
        Ok(self.arena.level(self.resolve(label)?))
    }

    /// Every bound label in ascending order, deleted elements included.
    ///
    /// # Errors
    /// Returns [`HnswError::LockPoisoned`] when the label table is poisoned.
    pub fn labels(&self) -> Result<Vec<Label>, HnswError> {
        let mut labels: Vec<Label> = self
            .registry
            .entries()?
            .into_iter()
            .map(|(label, _)| label)
            .collect();
        labels.sort_unstable();
        Ok(labels)
    }

    pub(super) fn resolve(&self, label: Label) -> Result<u32, HnswError> {
        self.registry
            .get(label)?
            .ok_or(HnswError::LabelNotFound { label })
    }

    pub(super) fn check_vector(&self, vector: &[u8]) -> Result<(), HnswError> {
        let expected = self.space.data_size();
        if vector.len() == expected {
            Ok(())
        } else {
            Err(HnswError::VectorSize {
                expected,
                actual: vector.len(),
            })
        }
    }

    #[inline]
    pub(super) fn entry_point(&self) -> Option<EntryPoint> {
        EntryPoint::unpack(self.entry.load(Ordering::Acquire))
    }

    pub(super) fn set_entry_point(&self, entry: EntryPoint) {
        self.entry.store(EntryPoint::pack(Some(entry)), Ordering::Release);
    }

    pub(super) fn note_undeleted(&self) {
        self.deleted.fetch_sub(1, Ordering::AcqRel);
    }

    pub(super) fn restore_deleted_count(&self, count: usize) {
        self.deleted.store(count, Ordering::Release);
    }
}
