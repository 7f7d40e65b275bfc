//! Layer traversal: greedy descent and the bounded best-first beam search
//! shared by insertion, update repair, and queries.

use std::{cmp::Reverse, collections::BinaryHeap};

use crate::{error::HnswError, space::Space};

use super::{
    index::HnswIndex,
    stats::QueryTally,
    types::{Candidate, LabelFilter, SearchResult},
};

/// How a traversal reads neighbour lists.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum LinkRead {
    /// Copy each list under its node lock. Used while the graph is mutated.
    Locked,
    /// Read the atomics directly. A concurrent writer may be observed
    /// mid-update, so a list can mix old and new entries; this is accepted
    /// for queries and never affects memory safety.
    Relaxed,
}

/// Inputs of one beam search over a single layer.
#[derive(Clone, Copy)]
pub(super) struct BeamSearch<'a> {
    pub(super) entry: u32,
    pub(super) query: &'a [u8],
    pub(super) layer: usize,
    pub(super) ef: usize,
    pub(super) reads: LinkRead,
    pub(super) filter: Option<&'a dyn LabelFilter>,
}

impl<S: Space> HnswIndex<S> {
    #[inline]
    pub(super) fn distance_to(&self, query: &[u8], id: u32) -> Result<f32, HnswError> {
        let stored = self.arena.read_vector(id)?;
        Ok(self.space.distance(query, &stored))
    }

    /// Distance between two stored nodes.
    ///
    /// Read guards are always taken in ascending id order.
    pub(super) fn distance_between(&self, left: u32, right: u32) -> Result<f32, HnswError> {
        if left == right {
            return Ok(0.0);
        }
        let (low, high) = if left < right {
            (left, right)
        } else {
            (right, left)
        };
        let low = self.arena.read_vector(low)?;
        let high = self.arena.read_vector(high)?;
        Ok(self.space.distance(&low, &high))
    }

    fn read_links(
        &self,
        id: u32,
        layer: usize,
        reads: LinkRead,
        out: &mut Vec<u32>,
    ) -> Result<(), HnswError> {
        match reads {
            LinkRead::Locked => {
                let _guard = self.arena.lock_node(id)?;
                self.arena.neighbours_into(id, layer, out);
            }
            LinkRead::Relaxed => self.arena.neighbours_into(id, layer, out),
        }
        Ok(())
    }

    /// Walks from `start` down through layers `top..=bottom`, moving to any
    /// strictly closer neighbour until none improves.
    pub(super) fn greedy_descend(
        &self,
        query: &[u8],
        start: Candidate,
        top: usize,
        bottom: usize,
        reads: LinkRead,
        tally: &mut QueryTally,
    ) -> Result<Candidate, HnswError> {
        let mut current = start;
        let mut neighbours = Vec::new();
        for layer in (bottom..=top).rev() {
            let mut changed = true;
            while changed {
                changed = false;
                self.read_links(current.id, layer, reads, &mut neighbours)?;
                tally.hop(neighbours.len());
                for &neighbour in &neighbours {
                    let distance = self.distance_to(query, neighbour)?;
                    if distance < current.distance {
                        current = Candidate::new(neighbour, distance);
                        changed = true;
                    }
                }
            }
        }
        Ok(current)
    }

    /// Returns up to `ef` admissible nodes closest to the query as a max-heap.
    ///
    /// Deleted nodes and nodes rejected by the filter are traversed but never
    /// enter the result set.
    pub(super) fn beam_search(
        &self,
        search: BeamSearch<'_>,
        tally: &mut QueryTally,
    ) -> Result<BinaryHeap<Candidate>, HnswError> {
        let mut visited = self.visited.acquire()?;
        let mut best = BinaryHeap::with_capacity(search.ef + 1);
        let mut frontier = BinaryHeap::new();

        let start = Candidate::new(search.entry, self.distance_to(search.query, search.entry)?);
        visited.insert(search.entry);
        frontier.push(Reverse(start));
        if self.admits(search.entry, search.filter) {
            best.push(start);
        }

        let mut neighbours = Vec::new();
        while let Some(Reverse(current)) = frontier.pop() {
            let bound = worst_distance(&best);
            if current.distance > bound && best.len() >= search.ef {
                break;
            }
            self.read_links(current.id, search.layer, search.reads, &mut neighbours)?;
            tally.hop(neighbours.len());

            for &neighbour in &neighbours {
                if !visited.insert(neighbour) {
                    continue;
                }
                let distance = self.distance_to(search.query, neighbour)?;
                if best.len() < search.ef || distance < worst_distance(&best) {
                    let candidate = Candidate::new(neighbour, distance);
                    frontier.push(Reverse(candidate));
                    if self.admits(neighbour, search.filter) {
                        best.push(candidate);
                        if best.len() > search.ef {
                            best.pop();
                        }
                    }
                }
            }
        }
        Ok(best)
    }

    #[inline]
    fn admits(&self, id: u32, filter: Option<&dyn LabelFilter>) -> bool {
        !self.arena.is_deleted(id) && filter.is_none_or(|filter| filter.allows(self.arena.label(id)))
    }

    /// Runs a k-NN query, returning the `k` best hits furthest-first.
    pub(super) fn knn(
        &self,
        query: &[u8],
        k: usize,
        filter: Option<&dyn LabelFilter>,
    ) -> Result<Vec<SearchResult>, HnswError> {
        self.check_vector(query)?;
        let Some(entry) = self.entry_point() else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut tally = QueryTally::default();
        let start = Candidate::new(entry.node, self.distance_to(query, entry.node)?);
        let closest = self.greedy_descend(query, start, entry.level, 1, LinkRead::Relaxed, &mut tally)?;
        let mut best = self.beam_search(
            BeamSearch {
                entry: closest.id,
                query,
                layer: 0,
                ef: self.ef().max(k),
                reads: LinkRead::Relaxed,
                filter,
            },
            &mut tally,
        )?;
        self.stats.record(tally.hops, tally.distance_computations);

        while best.len() > k {
            best.pop();
        }
        let mut results = Vec::with_capacity(best.len());
        while let Some(hit) = best.pop() {
            results.push(SearchResult {
                distance: hit.distance,
                label: self.arena.label(hit.id),
            });
        }
        Ok(results)
    }
}

#[inline]
fn worst_distance(best: &BinaryHeap<Candidate>) -> f32 {
    best.peek().map_or(f32::INFINITY, |worst| worst.distance)
}
