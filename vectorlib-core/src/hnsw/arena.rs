//! Node storage: packed record layout, link lists, vectors, and labels.
//!
//! Base-layer links live in one flat table of atomic words indexed by
//! `id * (1 + M0)`. The first word of every list is a header whose low
//! 16 bits hold the neighbour count; bit 16 is the deletion tombstone on
//! the base layer. Upper-layer lists are allocated per node, sized exactly
//! to `level * (1 + M)` words, so a node's level is implied by that length.

use std::sync::{
    Mutex, MutexGuard, OnceLock, RwLock, RwLockReadGuard,
    atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
};

use crate::error::HnswError;

use super::{Label, params::HnswParams};

const COUNT_MASK: u32 = 0xFFFF;
/// Tombstone bit, the lowest bit of the header's third byte.
pub(crate) const DELETED_FLAG: u32 = 1 << 16;
const WORD_BYTES: usize = size_of::<u32>();
const LABEL_BYTES: usize = size_of::<Label>();

#[inline]
pub(crate) fn header_count(header: u32) -> usize {
    (header & COUNT_MASK) as usize
}

/// Byte offsets of the fields inside one serialised base-layer record.
///
/// A record is `[header, M0 link slots, vector bytes, label]`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RecordLayout {
    data_size: usize,
    max_m: usize,
    max_m0: usize,
}

impl RecordLayout {
    pub(crate) fn new(data_size: usize, params: &HnswParams) -> Self {
        Self {
            data_size,
            max_m: params.max_connections(),
            max_m0: params.max_connections_level0(),
        }
    }

    #[rustfmt::skip]
    pub(crate) fn data_size(&self) -> usize { self.data_size }

    /// Words in a base-layer list, header included.
    #[rustfmt::skip]
    pub(crate) fn level0_words(&self) -> usize { 1 + self.max_m0 }

    /// Words in one upper-layer list, header included.
    #[rustfmt::skip]
    pub(crate) fn upper_words(&self) -> usize { 1 + self.max_m }

    #[rustfmt::skip]
    pub(crate) fn upper_layer_bytes(&self) -> usize { self.upper_words() * WORD_BYTES }

    #[rustfmt::skip]
    pub(crate) fn links_offset(&self) -> usize { 0 }

    #[rustfmt::skip]
    pub(crate) fn vector_offset(&self) -> usize { self.level0_words() * WORD_BYTES }

    #[rustfmt::skip]
    pub(crate) fn label_offset(&self) -> usize { self.vector_offset() + self.data_size }

    #[rustfmt::skip]
    pub(crate) fn record_size(&self) -> usize { self.label_offset() + LABEL_BYTES }
}

/// Preallocated per-node state for up to `capacity` nodes.
#[derive(Debug)]
pub(crate) struct NodeArena {
    layout: RecordLayout,
    capacity: usize,
    len: AtomicUsize,
    level0: Box<[AtomicU32]>,
    upper: Box<[OnceLock<Box<[AtomicU32]>>]>,
    vectors: Box<[RwLock<Box<[u8]>>]>,
    labels: Box<[AtomicU64]>,
    node_locks: Box<[Mutex<()>]>,
}

impl NodeArena {
    pub(crate) fn new(layout: RecordLayout, capacity: usize) -> Self {
        Self {
            layout,
            capacity,
            len: AtomicUsize::new(0),
            level0: (0..capacity * layout.level0_words())
                .map(|_| AtomicU32::new(0))
                .collect(),
            upper: (0..capacity).map(|_| OnceLock::new()).collect(),
            vectors: (0..capacity).map(|_| RwLock::new(Box::default())).collect(),
            labels: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            node_locks: (0..capacity).map(|_| Mutex::new(())).collect(),
        }
    }

    #[rustfmt::skip]
    pub(crate) fn layout(&self) -> &RecordLayout { &self.layout }

    #[rustfmt::skip]
    pub(crate) fn capacity(&self) -> usize { self.capacity }

    /// Number of ids handed out so far.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// Reserves the next dense id.
    ///
    /// # Errors
    /// Returns [`HnswError::CapacityExceeded`] once every slot is taken.
    pub(crate) fn allocate(&self) -> Result<u32, HnswError> {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.capacity).then_some(len + 1)
            })
            .map(|id| id as u32)
            .map_err(|_| HnswError::CapacityExceeded {
                capacity: self.capacity,
            })
    }

    /// Sets the id watermark after a bulk restore.
    pub(crate) fn restore_len(&self, len: usize) {
        debug_assert!(len <= self.capacity);
        self.len.store(len, Ordering::Release);
    }

    /// Returns the highest layer `id` participates in.
    #[inline]
    pub(crate) fn level(&self, id: u32) -> usize {
        self.upper[id as usize]
            .get()
            .map_or(0, |words| words.len() / self.layout.upper_words())
    }

    /// Allocates the zeroed upper-layer lists of a fresh node.
    ///
    /// # Errors
    /// Returns [`HnswError::InvalidOperation`] when the slot already carries
    /// upper lists of a different height.
    pub(crate) fn init_levels(&self, id: u32, level: usize) -> Result<(), HnswError> {
        if level == 0 {
            return if self.level(id) == 0 {
                Ok(())
            } else {
                Err(HnswError::invalid_operation(format!(
                    "node {id} already has upper layers"
                )))
            };
        }
        let words = level
            .checked_mul(self.layout.upper_words())
            .ok_or_else(|| {
                HnswError::invalid_operation(format!("node {id} cannot hold {level} layers"))
            })?;
        let lists = self.upper[id as usize]
            .get_or_init(|| (0..words).map(|_| AtomicU32::new(0)).collect());
        if lists.len() == words {
            Ok(())
        } else {
            Err(HnswError::invalid_operation(format!(
                "node {id} already has a different level"
            )))
        }
    }

    /// Returns the header word followed by the link slots of one list, or
    /// `None` when `id` does not reach `layer`.
    #[inline]
    pub(crate) fn list(&self, id: u32, layer: usize) -> Option<&[AtomicU32]> {
        if layer == 0 {
            let stride = self.layout.level0_words();
            let start = id as usize * stride;
            return self.level0.get(start..start + stride);
        }
        let stride = self.layout.upper_words();
        let start = (layer - 1) * stride;
        self.upper[id as usize].get()?.get(start..start + stride)
    }

    /// Copies the neighbours of `id` at `layer` into `out`.
    ///
    /// Without the node lock a concurrent writer may be observed mid-update;
    /// every id read is still a valid node.
    pub(crate) fn neighbours_into(&self, id: u32, layer: usize, out: &mut Vec<u32>) {
        out.clear();
        let Some(list) = self.list(id, layer) else {
            return;
        };
        let count = header_count(list[0].load(Ordering::Acquire)).min(list.len() - 1);
        out.extend(list[1..=count].iter().map(|slot| slot.load(Ordering::Acquire)));
    }

    pub(crate) fn neighbours(&self, id: u32, layer: usize) -> Vec<u32> {
        let mut out = Vec::new();
        self.neighbours_into(id, layer, &mut out);
        out
    }

    /// Overwrites the neighbours of `id` at `layer`, keeping header flags.
    ///
    /// The caller must hold the node lock of `id`.
    pub(crate) fn set_neighbours(&self, id: u32, layer: usize, neighbours: &[u32]) {
        let Some(list) = self.list(id, layer) else {
            return;
        };
        debug_assert!(neighbours.len() < list.len(), "neighbour list overflow");
        let count = neighbours.len().min(list.len() - 1);
        for (slot, &neighbour) in list[1..].iter().zip(&neighbours[..count]) {
            slot.store(neighbour, Ordering::Relaxed);
        }
        // The update closure never returns `None`, so this cannot fail.
        let _ = list[0].fetch_update(Ordering::Release, Ordering::Relaxed, |header| {
            Some((header & !COUNT_MASK) | count as u32)
        });
    }

    #[inline]
    pub(crate) fn is_deleted(&self, id: u32) -> bool {
        self.level0[id as usize * self.layout.level0_words()].load(Ordering::Acquire)
            & DELETED_FLAG
            != 0
    }

    /// Sets the tombstone, returning `false` when it was already set.
    pub(crate) fn mark_deleted(&self, id: u32) -> bool {
        let header = &self.level0[id as usize * self.layout.level0_words()];
        header.fetch_or(DELETED_FLAG, Ordering::AcqRel) & DELETED_FLAG == 0
    }

    /// Clears the tombstone, returning `false` when it was not set.
    pub(crate) fn unmark_deleted(&self, id: u32) -> bool {
        let header = &self.level0[id as usize * self.layout.level0_words()];
        header.fetch_and(!DELETED_FLAG, Ordering::AcqRel) & DELETED_FLAG != 0
    }

    #[inline]
    pub(crate) fn label(&self, id: u32) -> Label {
        self.labels[id as usize].load(Ordering::Acquire)
    }

    pub(crate) fn set_label(&self, id: u32, label: Label) {
        self.labels[id as usize].store(label, Ordering::Release);
    }

    pub(crate) fn read_vector(&self, id: u32) -> Result<RwLockReadGuard<'_, Box<[u8]>>, HnswError> {
        self.vectors[id as usize]
            .read()
            .map_err(|_| HnswError::LockPoisoned { resource: "vector" })
    }

    pub(crate) fn write_vector(&self, id: u32, bytes: &[u8]) -> Result<(), HnswError> {
        let mut stored = self.vectors[id as usize]
            .write()
            .map_err(|_| HnswError::LockPoisoned { resource: "vector" })?;
        if stored.len() == bytes.len() {
            stored.copy_from_slice(bytes);
        } else {
            *stored = bytes.into();
        }
        Ok(())
    }

    /// Locks the link lists of `id` against concurrent writers.
    pub(crate) fn lock_node(&self, id: u32) -> Result<MutexGuard<'_, ()>, HnswError> {
        self.node_locks[id as usize]
            .lock()
            .map_err(|_| HnswError::LockPoisoned {
                resource: "node links",
            })
    }

    /// Neighbours read while holding the node lock, so never torn.
    pub(crate) fn neighbours_locked(&self, id: u32, layer: usize) -> Result<Vec<u32>, HnswError> {
        let _guard = self.lock_node(id)?;
        Ok(self.neighbours(id, layer))
    }

    /// Raw words of the base-layer list, header included.
    pub(crate) fn level0_words(&self, id: u32) -> impl Iterator<Item = u32> + '_ {
        let stride = self.layout.level0_words();
        let start = id as usize * stride;
        self.level0[start..start + stride]
            .iter()
            .map(|word| word.load(Ordering::Acquire))
    }

    /// Raw words of every upper-layer list, headers included.
    pub(crate) fn upper_words(&self, id: u32) -> impl Iterator<Item = u32> + '_ {
        self.upper[id as usize]
            .get()
            .into_iter()
            .flat_map(|words| words.iter())
            .map(|word| word.load(Ordering::Acquire))
    }

    /// Installs the persisted base-layer words of `id`.
    pub(crate) fn restore_level0(&self, id: u32, words: &[u32]) {
        let stride = self.layout.level0_words();
        let start = id as usize * stride;
        for (slot, &word) in self.level0[start..start + stride].iter().zip(words) {
            slot.store(word, Ordering::Relaxed);
        }
    }

    /// Installs the persisted upper-layer words of `id`.
    pub(crate) fn restore_upper(&self, id: u32, words: Vec<u32>) -> Result<(), HnswError> {
        if words.is_empty() {
            return Ok(());
        }
        let words: Box<[AtomicU32]> = words.into_iter().map(AtomicU32::new).collect();
        self.upper[id as usize]
            .set(words)
            .map_err(|_| HnswError::corrupted(format!("node {id} restored twice")))
    }
}
