//! Mapping between external labels and internal ids, plus the pool of
//! deleted slots available for replacement.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Mutex, MutexGuard},
};

use crate::error::HnswError;

use super::Label;

#[derive(Debug, Default)]
pub(crate) struct LabelRegistry {
    lookup: Mutex<HashMap<Label, u32>>,
    vacant: Mutex<BTreeSet<u32>>,
}

impl LabelRegistry {
    fn lookup_table(&self) -> Result<MutexGuard<'_, HashMap<Label, u32>>, HnswError> {
        self.lookup.lock().map_err(|_| HnswError::LockPoisoned {
            resource: "label lookup",
        })
    }

    fn vacant_slots(&self) -> Result<MutexGuard<'_, BTreeSet<u32>>, HnswError> {
        self.vacant.lock().map_err(|_| HnswError::LockPoisoned {
            resource: "deleted slot pool",
        })
    }

    pub(crate) fn get(&self, label: Label) -> Result<Option<u32>, HnswError> {
        Ok(self.lookup_table()?.get(&label).copied())
    }

    /// Resolves `label`, or binds it to a freshly allocated id.
    ///
    /// Lookup, allocation, and binding happen under one lock so no caller
    /// can observe the label unbound after another has claimed it.
    pub(crate) fn get_or_bind(
        &self,
        label: Label,
        allocate: impl FnOnce() -> Result<u32, HnswError>,
    ) -> Result<Binding, HnswError> {
        let mut table = self.lookup_table()?;
        if let Some(&id) = table.get(&label) {
            return Ok(Binding::Existing(id));
        }
        let id = allocate()?;
        table.insert(label, id);
        Ok(Binding::Fresh(id))
    }

    /// Moves `id` from `previous` to `label`.
    ///
    /// `previous` is only unbound while it still points at `id`.
    pub(crate) fn rebind(&self, previous: Label, label: Label, id: u32) -> Result<(), HnswError> {
        let mut table = self.lookup_table()?;
        if table.get(&previous) == Some(&id) {
            table.remove(&previous);
        }
        table.insert(label, id);
        Ok(())
    }

    /// Binds a restored node, rejecting duplicate labels.
    pub(crate) fn bind_restored(&self, label: Label, id: u32) -> Result<(), HnswError> {
        match self.lookup_table()?.insert(label, id) {
            None => Ok(()),
            Some(other) => Err(HnswError::corrupted(format!(
                "label {label} stored for both node {other} and node {id}"
            ))),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> Result<usize, HnswError> {
        Ok(self.lookup_table()?.len())
    }

    /// Snapshot of every bound `(label, id)` pair.
    pub(crate) fn entries(&self) -> Result<Vec<(Label, u32)>, HnswError> {
        Ok(self
            .lookup_table()?
            .iter()
            .map(|(&label, &id)| (label, id))
            .collect())
    }

    pub(crate) fn push_vacant(&self, id: u32) -> Result<(), HnswError> {
        self.vacant_slots()?.insert(id);
        Ok(())
    }

    pub(crate) fn remove_vacant(&self, id: u32) -> Result<bool, HnswError> {
        Ok(self.vacant_slots()?.remove(&id))
    }

    /// Claims the lowest vacant slot, if any.
    pub(crate) fn take_vacant(&self) -> Result<Option<u32>, HnswError> {
        Ok(self.vacant_slots()?.pop_first())
    }

    #[cfg(test)]
    pub(crate) fn vacant_len(&self) -> Result<usize, HnswError> {
        Ok(self.vacant_slots()?.len())
    }
}

/// Outcome of [`LabelRegistry::get_or_bind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Binding {
    Existing(u32),
    Fresh(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_once_then_resolves() {
        let registry = LabelRegistry::default();
        let first = registry.get_or_bind(7, || Ok(0)).expect("bind must succeed");
        let second = registry
            .get_or_bind(7, || panic!("existing label must not allocate"))
            .expect("lookup must succeed");
        assert_eq!(first, Binding::Fresh(0));
        assert_eq!(second, Binding::Existing(0));
        assert_eq!(registry.get(7).expect("lookup must succeed"), Some(0));
    }

    #[test]
    fn failed_allocation_leaves_label_unbound() {
        let registry = LabelRegistry::default();
        let err = registry
            .get_or_bind(3, || Err(HnswError::CapacityExceeded { capacity: 0 }))
            .expect_err("allocation failure must propagate");
        assert_eq!(err.code().as_str(), "HNSW_CAPACITY_EXCEEDED");
        assert_eq!(registry.get(3).expect("lookup must succeed"), None);
    }

    #[test]
    fn rebind_moves_slot_between_labels() {
        let registry = LabelRegistry::default();
        registry.get_or_bind(1, || Ok(4)).expect("bind must succeed");
        registry.rebind(1, 2, 4).expect("rebind must succeed");
        assert_eq!(registry.get(1).expect("lookup must succeed"), None);
        assert_eq!(registry.get(2).expect("lookup must succeed"), Some(4));
        assert_eq!(registry.len().expect("len must succeed"), 1);
    }

    #[test]
    fn vacant_slots_are_claimed_lowest_first() {
        let registry = LabelRegistry::default();
        for id in [5, 2, 9] {
            registry.push_vacant(id).expect("push must succeed");
        }
        assert_eq!(registry.vacant_len().expect("len must succeed"), 3);
        assert!(registry.remove_vacant(9).expect("remove must succeed"));
        assert_eq!(registry.take_vacant().expect("take must succeed"), Some(2));
        assert_eq!(registry.take_vacant().expect("take must succeed"), Some(5));
        assert_eq!(registry.take_vacant().expect("take must succeed"), None);
    }

    #[test]
    fn duplicate_restored_label_is_corruption() {
        let registry = LabelRegistry::default();
        registry.bind_restored(1, 0).expect("first bind must succeed");
        let err = registry
            .bind_restored(1, 1)
            .expect_err("duplicate label must be rejected");
        assert_eq!(err.code().as_str(), "HNSW_CORRUPTED");
    }
}
