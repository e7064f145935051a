//! Append-only commitment tree
//!
//! One binary Poseidon Merkle tree per token, mirroring the on-chain tree.
//! Leaves are coin commitments in emission order; the root doubles as the
//! consistency oracle when checking local state against the contract.
//!
//! Interior levels are grown lazily instead of being preallocated, so a
//! depth-20 tree with a handful of leaves costs a handful of nodes. Absent
//! positions read as the all-empty subtree hash for their level.

use crate::algebra::pack_path_indices;
use crate::poseidon::poseidon2;
use crate::Field;
use alloy_primitives::Address;
use ark_ff::PrimeField;
use once_cell::sync::Lazy;
use sha3::{Digest, Keccak256};
use thiserror::Error;

/// Tree depth used by the deployed pools
pub const DEFAULT_TREE_DEPTH: usize = 20;

/// Hard cap on supported depth
pub const MAX_TREE_DEPTH: usize = 32;

/// Leaf value for unoccupied positions: keccak256("cipher") reduced into the field
pub static ZERO_VALUE: Lazy<Field> = Lazy::new(|| {
    let hash = Keccak256::digest(b"cipher");
    Field::from_be_bytes_mod_order(&hash)
});

/// Precomputed all-empty subtree hashes, indexed by level (0 = leaf)
pub static ZERO_HASHES: Lazy<[Field; MAX_TREE_DEPTH + 1]> = Lazy::new(|| {
    let mut hashes = [Field::from(0u64); MAX_TREE_DEPTH + 1];
    hashes[0] = *ZERO_VALUE;
    for level in 1..=MAX_TREE_DEPTH {
        hashes[level] = poseidon2(hashes[level - 1], hashes[level - 1]);
    }
    hashes
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    #[error("Leaf index {index} out of range ({leaf_count} leaves)")]
    IndexOutOfRange { index: u64, leaf_count: u64 },
    #[error("Tree at depth {depth} is full")]
    TreeFull { depth: usize },
    #[error("Unsupported tree depth {0}")]
    DepthOutOfRange(usize),
}

/// Merkle authentication path for one leaf.
///
/// `elements[i]` is the sibling hash at level `i`; `indices[i]` is true when
/// the running node is the right child at that level (LSB-first, this is the
/// leaf index in binary).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerklePath {
    pub elements: Vec<Field>,
    pub indices: Vec<bool>,
}

impl MerklePath {
    /// Fold the path back up to a root.
    pub fn compute_root(&self, leaf: Field) -> Field {
        self.elements
            .iter()
            .zip(self.indices.iter())
            .fold(leaf, |node, (sibling, is_right)| {
                if *is_right {
                    poseidon2(*sibling, node)
                } else {
                    poseidon2(node, *sibling)
                }
            })
    }

    /// Path directions packed into one field element, as the nullifier
    /// preimage expects them.
    pub fn packed_indices(&self) -> Field {
        pack_path_indices(&self.indices)
    }
}

/// Incremental Merkle tree over the commitments of a single token.
#[derive(Clone, Debug)]
pub struct CipherTree {
    token: Address,
    depth: usize,
    leaves: Vec<Field>,
    /// nodes[level], level 0 mirroring `leaves`; levels grow as leaves arrive
    nodes: Vec<Vec<Field>>,
}

impl CipherTree {
    pub fn new(token: Address, depth: usize) -> Result<Self, TreeError> {
        if depth == 0 || depth > MAX_TREE_DEPTH {
            return Err(TreeError::DepthOutOfRange(depth));
        }
        Ok(Self {
            token,
            depth,
            leaves: Vec::new(),
            nodes: vec![Vec::new(); depth + 1],
        })
    }

    pub fn with_default_depth(token: Address) -> Self {
        Self::new(token, DEFAULT_TREE_DEPTH).expect("default depth is valid")
    }

    pub fn token(&self) -> Address {
        self.token
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Index the next inserted leaf will occupy
    pub fn next_index(&self) -> u64 {
        self.leaves.len() as u64
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn leaves(&self) -> &[Field] {
        &self.leaves
    }

    /// Current root; the empty tree hashes to `ZERO_HASHES[depth]`.
    pub fn root(&self) -> Field {
        self.node(self.depth, 0)
    }

    /// Append one leaf, updating the path up to the root.
    ///
    /// Returns the index the leaf landed on.
    pub fn insert(&mut self, leaf: Field) -> Result<u64, TreeError> {
        let index = self.leaves.len();
        if index as u64 >= self.capacity() {
            return Err(TreeError::TreeFull { depth: self.depth });
        }
        self.leaves.push(leaf);
        self.set_node(0, index, leaf);

        let mut current = index;
        for level in 0..self.depth {
            let sibling = self.node(level, current ^ 1);
            let node = self.node(level, current);
            let parent = if current % 2 == 0 {
                poseidon2(node, sibling)
            } else {
                poseidon2(sibling, node)
            };
            current /= 2;
            self.set_node(level + 1, current, parent);
        }
        Ok(index as u64)
    }

    /// Append many leaves, then rebuild interior levels in parallel.
    ///
    /// Same result as repeated `insert`, but each level is hashed once, which
    /// is what makes replaying thousands of events tolerable. Returns the
    /// index of the first appended leaf.
    pub fn batch_insert(&mut self, new_leaves: &[Field]) -> Result<u64, TreeError> {
        let first = self.leaves.len() as u64;
        if first + new_leaves.len() as u64 > self.capacity() {
            return Err(TreeError::TreeFull { depth: self.depth });
        }
        self.leaves.extend_from_slice(new_leaves);
        self.nodes[0].extend_from_slice(new_leaves);
        self.rebuild();
        Ok(first)
    }

    fn rebuild(&mut self) {
        use rayon::prelude::*;
        for level in 0..self.depth {
            let zero = ZERO_HASHES[level];
            let children = &self.nodes[level];
            let parents: Vec<Field> = (0..children.len().div_ceil(2))
                .into_par_iter()
                .map(|i| {
                    let left = children.get(2 * i).copied().unwrap_or(zero);
                    let right = children.get(2 * i + 1).copied().unwrap_or(zero);
                    poseidon2(left, right)
                })
                .collect();
            self.nodes[level + 1] = parents;
        }
    }

    /// Authentication path for the leaf at `leaf_index`.
    pub fn gen_merkle_path(&self, leaf_index: u64) -> Result<MerklePath, TreeError> {
        if leaf_index >= self.leaves.len() as u64 {
            return Err(TreeError::IndexOutOfRange {
                index: leaf_index,
                leaf_count: self.leaves.len() as u64,
            });
        }
        let mut elements = Vec::with_capacity(self.depth);
        let mut indices = Vec::with_capacity(self.depth);
        let mut current = leaf_index as usize;
        for level in 0..self.depth {
            elements.push(self.node(level, current ^ 1));
            indices.push(current % 2 == 1);
            current /= 2;
        }
        Ok(MerklePath { elements, indices })
    }

    /// Locate a commitment among the leaves (code recovery scans for it).
    pub fn index_of(&self, leaf: &Field) -> Option<u64> {
        self.leaves.iter().position(|l| l == leaf).map(|i| i as u64)
    }

    fn node(&self, level: usize, index: usize) -> Field {
        self.nodes[level]
            .get(index)
            .copied()
            .unwrap_or(ZERO_HASHES[level])
    }

    fn set_node(&mut self, level: usize, index: usize, value: Field) {
        let level_nodes = &mut self.nodes[level];
        if index < level_nodes.len() {
            level_nodes[index] = value;
        } else {
            // contiguous inserts keep this at most one past the end
            debug_assert_eq!(index, level_nodes.len());
            level_nodes.push(value);
        }
    }
}
