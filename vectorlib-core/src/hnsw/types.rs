//! Shared value types: heap entries, the packed entry point, query results,
//! and label filters.

use std::cmp::Ordering;

use super::Label;

/// Internal node paired with its distance to the current query.
///
/// Ordered by distance, then id, so a `BinaryHeap<Candidate>` pops the
/// furthest element first.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Candidate {
    pub(crate) distance: f32,
    pub(crate) id: u32,
}

impl Candidate {
    #[inline]
    pub(crate) fn new(id: u32, distance: f32) -> Self {
        Self { distance, id }
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Node every descent starts from, always placed on the top layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct EntryPoint {
    pub(crate) node: u32,
    pub(crate) level: usize,
}

impl EntryPoint {
    /// Packs an optional entry point into one word; zero means "none".
    pub(crate) fn pack(entry: Option<Self>) -> u64 {
        entry.map_or(0, |ep| ((ep.level as u64 + 1) << 32) | u64::from(ep.node))
    }

    pub(crate) fn unpack(word: u64) -> Option<Self> {
        let level = word >> 32;
        (level != 0).then(|| Self {
            node: word as u32,
            level: (level - 1) as usize,
        })
    }
}

/// One neighbour returned from a k-NN query.
///
/// # Examples
/// ```
/// use vectorlib_core::SearchResult;
///
/// let hit = SearchResult { distance: 0.25, label: 7 };
/// assert_eq!(hit.label, 7);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchResult {
    /// Distance between the query and the stored vector.
    pub distance: f32,
    /// Label the vector was inserted under.
    pub label: Label,
}

/// Predicate restricting which labels may appear in query results.
///
/// Excluded nodes are still traversed, so results reachable only through
/// them are found. Any `Fn(Label) -> bool` closure is a filter.
///
/// # Examples
/// ```
/// use vectorlib_core::LabelFilter;
///
/// let even = |label: u64| label % 2 == 0;
/// assert!(even.allows(4));
/// assert!(!even.allows(5));
/// ```
pub trait LabelFilter: Sync {
    /// Returns `true` when `label` may be returned.
    fn allows(&self, label: Label) -> bool;
}

impl<F> LabelFilter for F
where
    F: Fn(Label) -> bool + Sync,
{
    fn allows(&self, label: Label) -> bool {
        self(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BinaryHeap;

    use rstest::rstest;

    #[rstest]
    #[case(None)]
    #[case(Some(EntryPoint { node: 0, level: 0 }))]
    #[case(Some(EntryPoint { node: u32::MAX - 1, level: 17 }))]
    fn entry_point_packing_is_lossless(#[case] entry: Option<EntryPoint>) {
        assert_eq!(EntryPoint::unpack(EntryPoint::pack(entry)), entry);
    }

    #[test]
    fn heap_pops_furthest_first_with_id_tie_break() {
        let mut heap: BinaryHeap<_> = [
            Candidate::new(1, 0.5),
            Candidate::new(3, 2.0),
            Candidate::new(2, 2.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(heap.pop().map(|c| c.id), Some(3));
        assert_eq!(heap.pop().map(|c| c.id), Some(2));
        assert_eq!(heap.pop().map(|c| c.id), Some(1));
    }
}
