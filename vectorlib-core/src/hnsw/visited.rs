//! Pool of generation-tagged visited lists for graph traversal.
//!
//! Each list stores one tag per internal id. A node counts as visited when
//! its slot equals the list's current tag, so starting a new traversal only
//! bumps the tag; the slots are zeroed when the tag wraps.

use std::{
    ops::{Deref, DerefMut},
    sync::{Mutex, PoisonError},
};

use crate::error::HnswError;

type Tag = u16;

/// Scratch buffer marking which internal ids a traversal has already seen.
#[derive(Debug)]
pub(crate) struct VisitedList {
    tags: Box<[Tag]>,
    current: Tag,
}

impl VisitedList {
    fn new(capacity: usize) -> Self {
        Self {
            tags: vec![0; capacity].into_boxed_slice(),
            current: 0,
        }
    }

    /// Starts a fresh traversal; no slot holds the new tag afterwards.
    fn advance(&mut self) {
        if self.current == Tag::MAX {
            self.tags.fill(0);
            self.current = 1;
        } else {
            self.current += 1;
        }
    }

    /// Marks `id` as visited, returning `true` when it had not been seen yet.
    #[inline]
    pub(crate) fn insert(&mut self, id: u32) -> bool {
        let slot = &mut self.tags[id as usize];
        if *slot == self.current {
            false
        } else {
            *slot = self.current;
            true
        }
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: u32) -> bool {
        self.tags[id as usize] == self.current
    }
}

/// Thread-safe pool lending [`VisitedList`]s sized to the index capacity.
#[derive(Debug)]
pub(crate) struct VisitedPool {
    free: Mutex<Vec<VisitedList>>,
    capacity: usize,
}

impl VisitedPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(vec![VisitedList::new(capacity)]),
            capacity,
        }
    }

    /// Borrows a list whose current tag is not stored in any slot.
    ///
    /// The list returns to the pool when the guard drops.
    pub(crate) fn acquire(&self) -> Result<VisitedGuard<'_>, HnswError> {
        let recycled = self
            .free
            .lock()
            .map_err(|_| HnswError::LockPoisoned {
                resource: "visited list pool",
            })?
            .pop();
        let mut list = recycled.unwrap_or_else(|| VisitedList::new(self.capacity));
        list.advance();
        Ok(VisitedGuard { pool: self, list })
    }

    /// Returns a list to the pool for reuse by later traversals.
    pub(crate) fn release(&self, list: VisitedList) {
        // A poisoned pool still holds valid buffers.
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(list);
    }

    #[cfg(test)]
    fn idle(&self) -> usize {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Borrowed [`VisitedList`] that releases itself on drop.
#[derive(Debug)]
pub(crate) struct VisitedGuard<'pool> {
    pool: &'pool VisitedPool,
    list: VisitedList,
}

impl Deref for VisitedGuard<'_> {
    type Target = VisitedList;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl DerefMut for VisitedGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

impl Drop for VisitedGuard<'_> {
    fn drop(&mut self) {
        let list = std::mem::replace(&mut self.list, VisitedList::new(0));
        self.pool.release(list);
    }
}
