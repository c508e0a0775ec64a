//! Merkle Tree for Import Audit Trails
//!
//! Commits to the ordered sequence of record hashes of one import job.
//! Leaves are paired left to right; an odd level pairs its last hash with
//! itself. Reordering leaves changes the root.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

use crate::audit::hashing::hash_pair;
use crate::error::{LedgerError, Result};

/// Compute the next level up from a level of hashes
fn next_level(level: &[String]) -> Vec<String> {
    let mut nodes: VecDeque<&String> = level.iter().collect();
    let mut next = Vec::with_capacity((level.len() + 1) / 2);

    while let Some(left) = nodes.pop_front() {
        match nodes.pop_front() {
            Some(right) => next.push(hash_pair(left, right)),
            None => next.push(hash_pair(left, left)),
        }
    }

    next
}

/// Merkle root of an ordered list of leaf hashes.
///
/// Empty input yields an empty string; a single leaf is its own root.
pub fn merkle_root(leaves: &[String]) -> String {
    match leaves.len() {
        0 => String::new(),
        1 => leaves[0].clone(),
        _ => {
            let mut level = next_level(leaves);
            while level.len() > 1 {
                level = next_level(&level);
            }
            debug!("Merkle root over {} leaves: {}", leaves.len(), level[0]);
            level.swap_remove(0)
        }
    }
}

/// Verify a claimed root against leaves
pub fn verify_merkle_root(leaves: &[String], claimed_root: &str) -> bool {
    merkle_root(leaves) == claimed_root
}

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub hash: String,
    pub side: Side,
}

/// Inclusion path from one leaf to the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub leaf_hash: String,
    pub path: Vec<ProofStep>,
}

impl MerkleProof {
    /// Recompute the root from the leaf and path
    pub fn computed_root(&self) -> String {
        self.path
            .iter()
            .fold(self.leaf_hash.clone(), |current, step| match step.side {
                Side::Left => hash_pair(&step.hash, &current),
                Side::Right => hash_pair(&current, &step.hash),
            })
    }

    /// Check the path against a root obtained independently
    pub fn verify(&self, trusted_root: &str) -> bool {
        !trusted_root.is_empty() && self.computed_root() == trusted_root
    }

    pub fn summary(&self) -> String {
        format!(
            "Merkle proof for leaf {}: {} steps",
            self.leaf_index,
            self.path.len()
        )
    }
}

/// Build the inclusion path for the leaf at `index`
pub fn merkle_proof(leaves: &[String], index: usize) -> Result<MerkleProof> {
    if index >= leaves.len() {
        return Err(LedgerError::InvalidInput(format!(
            "Leaf index {} out of range for {} leaves",
            index,
            leaves.len()
        )));
    }

    let mut path = Vec::new();
    let mut level: Vec<String> = leaves.to_vec();
    let mut position = index;

    while level.len() > 1 {
        let step = if position % 2 == 0 {
            // Last node of an odd level is paired with itself
            let sibling = level.get(position + 1).unwrap_or(&level[position]);
            ProofStep {
                hash: sibling.clone(),
                side: Side::Right,
            }
        } else {
            ProofStep {
                hash: level[position - 1].clone(),
                side: Side::Left,
            }
        };
        path.push(step);
        level = next_level(&level);
        position /= 2;
    }

    Ok(MerkleProof {
        leaf_index: index,
        leaf_hash: leaves[index].clone(),
        path,
    })
}
