//! Structural invariant checks for the HNSW graph.
//!
//! Intended for tests and diagnostics on a quiescent index: a check racing
//! concurrent writers may report transient states.

use std::collections::HashMap;

use thiserror::Error;

use crate::{error::HnswError, space::Space};

use super::{Label, index::HnswIndex};

/// Enumerates the structural invariants the index maintains.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HnswInvariant {
    /// Links point at stored nodes other than their origin, which reach the
    /// layer the link lives on.
    LayerConsistency,
    /// Lists hold at most `M0` entries on layer zero and `M` above.
    DegreeBounds,
    /// Labels and internal ids map one-to-one.
    LabelBijection,
    /// The entry point sits on the top layer and no node is higher.
    EntryPoint,
}

impl HnswInvariant {
    /// Returns all invariants in evaluation order.
    #[must_use]
    pub const fn all() -> [Self; 4] {
        [
            Self::LayerConsistency,
            Self::DegreeBounds,
            Self::LabelBijection,
            Self::EntryPoint,
        ]
    }
}

/// Reports a broken invariant.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HnswInvariantViolation {
    /// A link targets a missing node, its origin, or a node below the layer.
    #[error("node {origin} references {target} at layer {layer}, which {detail}")]
    LayerConsistency {
        /// Node that owns the link.
        origin: u32,
        /// Linked node.
        target: u32,
        /// Layer of the link.
        layer: usize,
        /// What is wrong with the target.
        detail: &'static str,
    },
    /// A list exceeds its cap.
    #[error("node {node} has {degree} connection(s) on layer {layer}, exceeding limit {limit}")]
    DegreeBounds {
        /// Node owning the list.
        node: u32,
        /// Layer of the list.
        layer: usize,
        /// Entries in the list.
        degree: usize,
        /// Cap for the layer.
        limit: usize,
    },
    /// The label table and the stored labels disagree.
    #[error("label {label} is bound to node {bound}, but that node stores label {stored}")]
    LabelMismatch {
        /// Label from the table.
        label: Label,
        /// Node the table points at.
        bound: u32,
        /// Label stored on that node.
        stored: Label,
    },
    /// A stored node has no label bound to it.
    #[error("node {node} is not reachable through any label")]
    UnboundNode {
        /// Orphaned node.
        node: u32,
    },
    /// The entry point is missing or not on the top layer.
    #[error("entry point invalid: {detail}")]
    EntryPoint {
        /// Description of the failure.
        detail: String,
    },
    /// The index state could not be read.
    #[error("index state unavailable: {message}")]
    Unavailable {
        /// Underlying error message.
        message: String,
    },
}

impl From<HnswError> for HnswInvariantViolation {
    fn from(err: HnswError) -> Self {
        Self::Unavailable {
            message: err.to_string(),
        }
    }
}

impl<S: Space> HnswIndex<S> {
    /// Runs every invariant, returning the first violation.
    ///
    /// # Errors
    /// Returns the first [`HnswInvariantViolation`] encountered.
    pub fn check_invariants(&self) -> Result<(), HnswInvariantViolation> {
        HnswInvariant::all()
            .into_iter()
            .try_for_each(|invariant| self.check_invariant(invariant))
    }

    /// Runs a single invariant.
    ///
    /// # Errors
    /// Returns the first [`HnswInvariantViolation`] for `invariant`.
    pub fn check_invariant(&self, invariant: HnswInvariant) -> Result<(), HnswInvariantViolation> {
        match invariant {
            HnswInvariant::LayerConsistency => self.check_layer_consistency(),
            HnswInvariant::DegreeBounds => self.check_degree_bounds(),
            HnswInvariant::LabelBijection => self.check_label_bijection(),
            HnswInvariant::EntryPoint => self.check_entry_point(),
        }
    }

    fn check_layer_consistency(&self) -> Result<(), HnswInvariantViolation> {
        let count = self.arena.len();
        for origin in 0..count as u32 {
            for layer in 0..=self.arena.level(origin) {
                for target in self.arena.neighbours(origin, layer) {
                    let detail = if target as usize >= count {
                        "is not a stored node"
                    } else if target == origin {
                        "is the node itself"
                    } else if self.arena.level(target) < layer {
                        "does not reach that layer"
                    } else {
                        continue;
                    };
                    return Err(HnswInvariantViolation::LayerConsistency {
                        origin,
                        target,
                        layer,
                        detail,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_degree_bounds(&self) -> Result<(), HnswInvariantViolation> {
        for node in 0..self.arena.len() as u32 {
            for layer in 0..=self.arena.level(node) {
                let limit = self.params.cap_for_layer(layer);
                let degree = self.arena.neighbours(node, layer).len();
                if degree > limit {
                    return Err(HnswInvariantViolation::DegreeBounds {
                        node,
                        layer,
                        degree,
                        limit,
                    });
                }
            }
        }
        Ok(())
    }

    fn check_label_bijection(&self) -> Result<(), HnswInvariantViolation> {
        let entries = self.registry.entries()?;
        let mut bound: HashMap<u32, Label> = HashMap::with_capacity(entries.len());
        for (label, id) in entries {
            let stored = self.arena.label(id);
            if id as usize >= self.arena.len() || stored != label {
                return Err(HnswInvariantViolation::LabelMismatch {
                    label,
                    bound: id,
                    stored,
                });
            }
            bound.insert(id, label);
        }
        match (0..self.arena.len() as u32).find(|id| !bound.contains_key(id)) {
            Some(node) => Err(HnswInvariantViolation::UnboundNode { node }),
            None => Ok(()),
        }
    }

    fn check_entry_point(&self) -> Result<(), HnswInvariantViolation> {
        let count = self.arena.len() as u32;
        let Some(entry) = self.entry_point() else {
            return if count == 0 {
                Ok(())
            } else {
                Err(HnswInvariantViolation::EntryPoint {
                    detail: format!("missing despite {count} stored node(s)"),
                })
            };
        };
        if entry.node >= count {
            return Err(HnswInvariantViolation::EntryPoint {
                detail: format!("node {} is not stored", entry.node),
            });
        }
        let level = self.arena.level(entry.node);
        if level != entry.level {
            return Err(HnswInvariantViolation::EntryPoint {
                detail: format!(
                    "node {} has level {level}, expected {}",
                    entry.node, entry.level
                ),
            });
        }
        if let Some(node) = (0..count).find(|&node| self.arena.level(node) > entry.level) {
            return Err(HnswInvariantViolation::EntryPoint {
                detail: format!("node {node} sits above the top layer {}", entry.level),
            });
        }
        Ok(())
    }
}
