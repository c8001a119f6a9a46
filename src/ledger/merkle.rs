//! Merkle Tree for Audit Records
//!
//! Summarizes a batch of records in a single root hash. Levels are built
//! pairwise; an odd node at the end of a level is paired with itself.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ledger::hash::{hash_leaf, hash_pair};
use crate::ledger::record::AuditRecord;

/// Side a sibling hash sits on relative to the running hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// Level 0 holds the leaves; the last level holds the root.
    levels: Vec<Vec<String>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<String>) -> Self {
        if leaves.is_empty() {
            return Self { levels: vec![] };
        }

        let mut levels = vec![leaves];
        while levels[levels.len() - 1].len() > 1 {
            let current = &levels[levels.len() - 1];
            let next: Vec<String> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_pair(left, right),
                    [single] => hash_pair(single, single),
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(next);
        }

        Self { levels }
    }

    pub fn from_records(records: &[AuditRecord]) -> Self {
        Self::from_leaves(records.iter().map(hash_leaf).collect())
    }

    /// Root hash, or the empty string for an empty tree.
    pub fn root(&self) -> String {
        self.levels
            .last()
            .and_then(|level| level.first())
            .cloned()
            .unwrap_or_default()
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn level(&self, depth: usize) -> Option<&[String]> {
        self.levels.get(depth).map(Vec::as_slice)
    }

    /// Inclusion proof for the leaf at `index`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut path = Vec::with_capacity(self.levels.len());
        let mut position = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let (sibling, side) = if position % 2 == 0 {
                // Odd tail pairs with itself.
                let sibling = level.get(position + 1).unwrap_or(&level[position]);
                (sibling.clone(), Side::Right)
            } else {
                (level[position - 1].clone(), Side::Left)
            };
            path.push((sibling, side));
            position /= 2;
        }

        Some(MerkleProof {
            leaf_hash: self.levels[0][index].clone(),
            path,
            root_hash: self.root(),
        })
    }
}

/// Merkle root over the records' leaf projections, `""` when empty.
pub fn merkle_root(records: &[AuditRecord]) -> String {
    let root = MerkleTree::from_records(records).root();
    debug!("Merkle root over {} records: {}", records.len(), root);
    root
}

pub fn verify_merkle_root(records: &[AuditRecord], claimed_root: &str) -> bool {
    merkle_root(records) == claimed_root
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_hash: String,
    pub path: Vec<(String, Side)>,
    pub root_hash: String,
}

impl MerkleProof {
    pub fn verify(&self) -> bool {
        let computed = self
            .path
            .iter()
            .fold(self.leaf_hash.clone(), |current, (sibling, side)| match side {
                Side::Left => hash_pair(sibling, &current),
                Side::Right => hash_pair(&current, sibling),
            });
        computed == self.root_hash
    }

    pub fn size(&self) -> usize {
        self.path.len()
    }
}
