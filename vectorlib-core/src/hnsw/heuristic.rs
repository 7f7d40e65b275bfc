//! Diversity-preserving neighbour selection.
//!
//! Candidates are admitted closest-first, and only when they are strictly
//! closer to the reference point than to every neighbour already admitted.
//! Skipping candidates that sit "behind" a kept neighbour stops the graph
//! from collapsing into clusters of near-duplicates.

use crate::error::HnswError;

use super::types::Candidate;

/// Reduces `candidates` to at most `cap` diverse neighbours.
///
/// `distance(a, b)` measures two stored nodes against each other. Inputs no
/// larger than `cap` are returned unchanged and without distance calls.
pub(crate) fn select_neighbours<F>(
    mut candidates: Vec<Candidate>,
    cap: usize,
    mut distance: F,
) -> Result<Vec<Candidate>, HnswError>
where
    F: FnMut(u32, u32) -> Result<f32, HnswError>,
{
    if candidates.len() <= cap {
        return Ok(candidates);
    }
    candidates.sort_unstable();

    let mut selected: Vec<Candidate> = Vec::with_capacity(cap);
    for candidate in candidates {
        if selected.len() >= cap {
            break;
        }
        let mut diverse = true;
        for kept in &selected {
            if distance(kept.id, candidate.id)? <= candidate.distance {
                diverse = false;
                break;
            }
        }
        if diverse {
            selected.push(candidate);
        }
    }
    Ok(selected)
}
