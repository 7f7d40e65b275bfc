//! Insertion, in-place update, slot replacement, and edge repair.
//!
//! A fresh node holds its own link lock for the whole insertion and takes
//! neighbour locks one at a time, always after finishing the layer it found
//! them on. Updates never hold their own lock across other acquisitions.

use std::collections::{BTreeSet, BinaryHeap};

use rand::{Rng, distributions::Standard};
use tracing::debug;

use crate::{error::HnswError, space::Space};

use super::{
    Label,
    heuristic::select_neighbours,
    index::HnswIndex,
    registry::Binding,
    search::{BeamSearch, LinkRead},
    stats::QueryTally,
    types::{Candidate, EntryPoint},
};

/// Whether the node being linked is new or already part of the graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum LinkMode {
    /// The caller already holds the node's link lock.
    Fresh,
    Update,
}

impl<S: Space> HnswIndex<S> {
    pub(super) fn insert(
        &self,
        vector: &[u8],
        label: Label,
        replace_deleted: bool,
    ) -> Result<u32, HnswError> {
        self.check_vector(vector)?;
        if replace_deleted && !self.params.allow_replace_deleted() {
            return Err(HnswError::invalid_operation(
                "replacement of deleted elements is disabled for this index",
            ));
        }

        let _label_guard = self.label_locks.lock(label)?;
        if replace_deleted {
            if self.registry.get(label)?.is_some() {
                return Err(HnswError::invalid_operation(format!(
                    "label {label} already exists; replacement only applies to new labels"
                )));
            }
            if let Some(id) = self.registry.take_vacant()? {
                self.replace_slot(id, label, vector)?;
                return Ok(id);
            }
        }

        match self.registry.get_or_bind(label, || self.arena.allocate())? {
            Binding::Existing(id) => {
                self.update_existing(id, vector)?;
                Ok(id)
            }
            Binding::Fresh(id) => {
                self.insert_fresh(id, label, vector)?;
                Ok(id)
            }
        }
    }

    fn sample_level(&self) -> Result<usize, HnswError> {
        let mut rng = self.level_rng.lock().map_err(|_| HnswError::LockPoisoned {
            resource: "level rng",
        })?;
        let draw: f64 = rng.sample(Standard);
        Ok(self.params.level_for_draw(draw))
    }

    fn insert_fresh(&self, id: u32, label: Label, vector: &[u8]) -> Result<(), HnswError> {
        let level = self.sample_level()?;
        let _node_guard = self.arena.lock_node(id)?;
        self.arena.init_levels(id, level)?;
        self.arena.write_vector(id, vector)?;
        self.arena.set_label(id, label);

        let global = self.global.lock().map_err(|_| HnswError::LockPoisoned {
            resource: "entry point",
        })?;
        let entry = self.entry_point();
        // Only an insertion that may raise the top layer keeps the global lock.
        let _global = match entry {
            Some(ep) if level <= ep.level => {
                drop(global);
                None
            }
            _ => Some(global),
        };
        let Some(entry) = entry else {
            self.set_entry_point(EntryPoint { node: id, level });
            debug!(node = id, level, "entry point initialised");
            return Ok(());
        };

        let mut tally = QueryTally::default();
        let entry_distance = self.distance_to(vector, entry.node)?;
        let mut current = self.greedy_descend(
            vector,
            Candidate::new(entry.node, entry_distance),
            entry.level,
            level + 1,
            LinkRead::Locked,
            &mut tally,
        )?;

        let entry_deleted = self.arena.is_deleted(entry.node);
        let ef = self.params.ef_construction();
        for layer in (0..=level.min(entry.level)).rev() {
            let mut candidates = self.beam_search(
                BeamSearch {
                    entry: current.id,
                    query: vector,
                    layer,
                    ef,
                    reads: LinkRead::Locked,
                    filter: None,
                },
                &mut tally,
            )?;
            if entry_deleted {
                candidates.push(Candidate::new(entry.node, entry_distance));
                if candidates.len() > ef {
                    candidates.pop();
                }
            }
            if let Some(closest) = self.mutually_connect(id, candidates, layer, LinkMode::Fresh)? {
                current = closest;
            }
        }

        if level > entry.level {
            self.set_entry_point(EntryPoint { node: id, level });
            debug!(node = id, level, previous = entry.level, "entry point raised");
        }
        Ok(())
    }

    fn update_existing(&self, id: u32, vector: &[u8]) -> Result<(), HnswError> {
        if self.arena.is_deleted(id) {
            if self.params.allow_replace_deleted() {
                return Err(HnswError::invalid_operation(
                    "deleted elements cannot be updated while replacement is enabled",
                ));
            }
            self.unmark_slot(id)?;
        }
        self.update_point(id, vector)
    }

    /// Moves a vacant deleted slot to `label` and refreshes it with `vector`.
    fn replace_slot(&self, id: u32, label: Label, vector: &[u8]) -> Result<(), HnswError> {
        let previous = self.arena.label(id);
        self.arena.set_label(id, label);
        self.registry.rebind(previous, label, id)?;
        self.unmark_slot(id)?;
        debug!(node = id, previous, label, "deleted slot reused");
        self.update_point(id, vector)
    }

    /// Clears the tombstone of `id` and withdraws it from the vacant pool.
    pub(super) fn unmark_slot(&self, id: u32) -> Result<(), HnswError> {
        if !self.arena.unmark_deleted(id) {
            return Err(HnswError::invalid_operation(format!(
                "node {id} is not deleted"
            )));
        }
        self.note_undeleted();
        if self.params.allow_replace_deleted() {
            self.registry.remove_vacant(id)?;
        }
        Ok(())
    }

    /// Overwrites the vector of `id` and rebuilds edges around it.
    ///
    /// Each neighbour's list is recomputed from the node's two-hop
    /// neighbourhood, then the node's own lists are re-searched from the
    /// entry point.
    fn update_point(&self, id: u32, vector: &[u8]) -> Result<(), HnswError> {
        self.arena.write_vector(id, vector)?;
        let Some(entry) = self.entry_point() else {
            return Ok(());
        };
        if entry.node == id && self.arena.len() == 1 {
            return Ok(());
        }

        let level = self.arena.level(id);
        for layer in 0..=level {
            let one_hop = self.arena.neighbours_locked(id, layer)?;
            if one_hop.is_empty() {
                continue;
            }
            let mut pool = BTreeSet::from([id]);
            for &neighbour in &one_hop {
                pool.insert(neighbour);
                pool.extend(self.arena.neighbours_locked(neighbour, layer)?);
            }
            for &neighbour in &one_hop {
                self.refresh_neighbour(neighbour, layer, &pool)?;
            }
        }

        self.repair_connections_for_update(vector, entry, id, level)
    }

    /// Rebuilds the list of `neighbour` from the nearest members of `pool`.
    fn refresh_neighbour(
        &self,
        neighbour: u32,
        layer: usize,
        pool: &BTreeSet<u32>,
    ) -> Result<(), HnswError> {
        let others = pool.len() - usize::from(pool.contains(&neighbour));
        let keep = self.params.ef_construction().min(others);
        let mut nearest = BinaryHeap::with_capacity(keep + 1);
        for &candidate in pool {
            if candidate == neighbour {
                continue;
            }
            let distance = self.distance_between(neighbour, candidate)?;
            if nearest.len() < keep {
                nearest.push(Candidate::new(candidate, distance));
            } else if nearest
                .peek()
                .is_some_and(|worst: &Candidate| distance < worst.distance)
            {
                nearest.pop();
                nearest.push(Candidate::new(candidate, distance));
            }
        }
        let selected = select_neighbours(
            nearest.into_vec(),
            self.params.cap_for_layer(layer),
            |a, b| self.distance_between(a, b),
        )?;
        let ids: Vec<u32> = selected.iter().map(|c| c.id).collect();
        let _guard = self.arena.lock_node(neighbour)?;
        self.arena.set_neighbours(neighbour, layer, &ids);
        Ok(())
    }

    /// Re-searches the lists of an updated node from the entry point.
    fn repair_connections_for_update(
        &self,
        vector: &[u8],
        entry: EntryPoint,
        id: u32,
        level: usize,
    ) -> Result<(), HnswError> {
        if level > entry.level {
            return Err(HnswError::invalid_operation(format!(
                "node {id} at level {level} is above the entry point level {}",
                entry.level
            )));
        }
        let mut tally = QueryTally::default();
        let entry_distance = self.distance_to(vector, entry.node)?;
        let mut current = self.greedy_descend(
            vector,
            Candidate::new(entry.node, entry_distance),
            entry.level,
            level + 1,
            LinkRead::Locked,
            &mut tally,
        )?;

        let entry_deleted = entry.node != id && self.arena.is_deleted(entry.node);
        let ef = self.params.ef_construction();
        for layer in (0..=level).rev() {
            let found = self.beam_search(
                BeamSearch {
                    entry: current.id,
                    query: vector,
                    layer,
                    ef,
                    reads: LinkRead::Locked,
                    filter: None,
                },
                &mut tally,
            )?;
            let mut candidates: BinaryHeap<Candidate> =
                found.into_iter().filter(|c| c.id != id).collect();
            if candidates.is_empty() {
                continue;
            }
            if entry_deleted {
                candidates.push(Candidate::new(entry.node, entry_distance));
                if candidates.len() > ef {
                    candidates.pop();
                }
            }
            if let Some(closest) = self.mutually_connect(id, candidates, layer, LinkMode::Update)? {
                current = closest;
            }
        }
        Ok(())
    }

    /// Writes the selected neighbours of `id` at `layer` and adds the
    /// reverse edges, pruning any neighbour list that would overflow.
    ///
    /// Returns the closest selected neighbour, the entry for the next layer.
    fn mutually_connect(
        &self,
        id: u32,
        candidates: BinaryHeap<Candidate>,
        layer: usize,
        mode: LinkMode,
    ) -> Result<Option<Candidate>, HnswError> {
        let cap = self.params.cap_for_layer(layer);
        let mut selected = select_neighbours(candidates.into_vec(), cap, |a, b| {
            self.distance_between(a, b)
        })?;
        selected.sort_unstable();
        let Some(&closest) = selected.first() else {
            return Ok(None);
        };
        let ids: Vec<u32> = selected.iter().map(|c| c.id).collect();

        {
            let _own = match mode {
                LinkMode::Update => Some(self.arena.lock_node(id)?),
                LinkMode::Fresh => None,
            };
            self.arena.set_neighbours(id, layer, &ids);
        }

        for &neighbour in &ids {
            debug_assert_ne!(neighbour, id, "self-loop selected");
            let _guard = self.arena.lock_node(neighbour)?;
            let mut links = self.arena.neighbours(neighbour, layer);
            if links.contains(&id) {
                continue;
            }
            if links.len() < cap {
                links.push(id);
                self.arena.set_neighbours(neighbour, layer, &links);
                continue;
            }

            let mut pool = Vec::with_capacity(links.len() + 1);
            pool.push(Candidate::new(id, self.distance_between(id, neighbour)?));
            for &other in &links {
                pool.push(Candidate::new(other, self.distance_between(other, neighbour)?));
            }
            let kept = select_neighbours(pool, cap, |a, b| self.distance_between(a, b))?;
            let kept: Vec<u32> = kept.iter().map(|c| c.id).collect();
            self.arena.set_neighbours(neighbour, layer, &kept);
        }
        Ok(Some(closest))
    }
}
