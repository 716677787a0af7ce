//! Merkle Tree
//!
//! A fixed-depth binary trie keyed by identifier bits. Level `l` consumes
//! `bit_at(l, id)`: bit 1 descends left, bit 0 right. Every id sharing a bit-path
//! lands in the same leaf at depth `D`.
//!
//! Hashes are computed on read from the current contents, so add/update/delete never
//! propagate anything upward, and the root hash is independent of insertion order.

pub mod hasher;
pub mod leaf;
pub mod node;
pub mod summary;

pub use leaf::Leaf;
pub use node::Node;
pub use summary::ItemSummary;

use crate::error::ApiError;
use crate::types::Hash;
use hasher::bit_at;
use node::not_found;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default trie depth; must match across the whole cluster
pub const DEFAULT_TREE_DEPTH: usize = 16;

/// Result of comparing two trees
#[derive(Debug, Clone, Default)]
pub struct TreeDiff {
    /// Entries to copy from the other tree
    pub entries: Vec<ItemSummary>,
    /// Subtrees skipped because a leaf met an internal node
    pub inconsistencies: usize,
}

/// Fixed-depth Merkle trie of item summaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleTree {
    depth: usize,
    root: Node,
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::new(DEFAULT_TREE_DEPTH)
    }
}

impl MerkleTree {
    /// Create an empty tree of the given depth
    pub fn new(depth: usize) -> Self {
        let root = if depth == 0 { Node::leaf() } else { Node::internal() };
        Self { depth, root }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Insert or overwrite a summary, creating the path lazily
    pub fn add(&mut self, summary: ItemSummary) -> Result<(), ApiError> {
        let depth = self.depth;
        // Reject short ids before any node on the path is created
        if depth > 0 {
            bit_at(depth - 1, &summary.id)?;
        }
        let mut current = &mut self.root;

        for level in 0..depth {
            let bit = bit_at(level, &summary.id)?;
            let is_last = level + 1 == depth;
            current = match current {
                Node::Internal { left, right } => {
                    let slot = if bit == 1 { left } else { right };
                    &mut **slot.get_or_insert_with(|| {
                        Box::new(if is_last { Node::leaf() } else { Node::internal() })
                    })
                }
                Node::Leaf(_) => {
                    return Err(ApiError::StructuralInconsistency(format!(
                        "leaf found at level {} of a depth {} tree",
                        level, depth
                    )))
                }
            };
        }

        match current {
            Node::Leaf(leaf) => {
                leaf.insert(summary);
                Ok(())
            }
            Node::Internal { .. } => Err(ApiError::StructuralInconsistency(format!(
                "internal node found at leaf depth {}",
                depth
            ))),
        }
    }

    /// Overwrite an existing summary; `NotFound` if the id is not in the tree
    pub fn update(&mut self, summary: ItemSummary) -> Result<(), ApiError> {
        let leaf = self.leaf_mut(&summary.id)?;
        if !leaf.contains(&summary.id) {
            return Err(not_found(&summary.id));
        }
        leaf.insert(summary);
        Ok(())
    }

    /// Remove an entry and prune every node it leaves empty (the root is kept)
    pub fn delete(&mut self, id: &[u8]) -> Result<(), ApiError> {
        self.root.remove(id, 0).map(|_| ())
    }

    /// Look up a summary by id
    pub fn get(&self, id: &[u8]) -> Option<&ItemSummary> {
        let mut current = &self.root;
        for level in 0..self.depth {
            let bit = bit_at(level, id).ok()?;
            current = match current {
                Node::Internal { left, right } => {
                    if bit == 1 {
                        left.as_deref()?
                    } else {
                        right.as_deref()?
                    }
                }
                Node::Leaf(_) => return None,
            };
        }
        match current {
            Node::Leaf(leaf) => leaf.get(id),
            Node::Internal { .. } => None,
        }
    }

    /// Root hash
    pub fn hash(&self) -> Hash {
        self.root.hash()
    }

    /// Entries that must be copied from `other` into `self` to converge
    pub fn diff(&self, other: &MerkleTree) -> Vec<ItemSummary> {
        self.diff_report(other).entries
    }

    /// Like [`MerkleTree::diff`], also reporting skipped inconsistent subtrees
    pub fn diff_report(&self, other: &MerkleTree) -> TreeDiff {
        let mut report = TreeDiff::default();
        if self.hash() == other.hash() {
            return report;
        }
        if self.depth != other.depth {
            warn!(
                local_depth = self.depth,
                remote_depth = other.depth,
                "Comparing merkle trees of different depths"
            );
        }
        report.inconsistencies = self.root.diff_into(&other.root, 0, &mut report.entries);
        report
    }

    /// Every summary in the tree
    pub fn entries(&self) -> Vec<ItemSummary> {
        let mut out = Vec::new();
        self.root.collect_into(&mut out);
        out
    }

    pub fn len(&self) -> usize {
        self.root.count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn leaf_mut(&mut self, id: &[u8]) -> Result<&mut Leaf, ApiError> {
        let mut current = &mut self.root;
        for level in 0..self.depth {
            let bit = bit_at(level, id)?;
            current = match current {
                Node::Internal { left, right } => {
                    let slot = if bit == 1 { left } else { right };
                    slot.as_deref_mut().ok_or_else(|| not_found(id))?
                }
                Node::Leaf(_) => return Err(not_found(id)),
            };
        }
        match current {
            Node::Leaf(leaf) => Ok(leaf),
            Node::Internal { .. } => Err(not_found(id)),
        }
    }
}
