//! Trie nodes and the recursive hash / diff / prune walks

use super::hasher::{bit_at, digest_concat};
use super::leaf::Leaf;
use super::summary::ItemSummary;
use crate::error::ApiError;
use crate::types::Hash;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Merkle node: an internal branch with optional children, or a leaf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    Internal {
        left: Option<Box<Node>>,
        right: Option<Box<Node>>,
    },
    Leaf(Leaf),
}

impl Node {
    pub fn internal() -> Self {
        Node::Internal {
            left: None,
            right: None,
        }
    }

    pub fn leaf() -> Self {
        Node::Leaf(Leaf::new())
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }

    /// Hash of this node: the leaf hash, or `hash(left ++ right)` over present children
    pub fn hash(&self) -> Hash {
        match self {
            Node::Leaf(leaf) => leaf.hash(),
            Node::Internal { left, right } => {
                let left = left.as_ref().map(|n| n.hash());
                let right = right.as_ref().map(|n| n.hash());
                digest_concat(left.iter().chain(right.iter()).map(|h| h.as_slice()))
            }
        }
    }

    /// Collect every summary under this node
    pub fn collect_into(&self, out: &mut Vec<ItemSummary>) {
        match self {
            Node::Leaf(leaf) => out.extend(leaf.entries().cloned()),
            Node::Internal { left, right } => {
                if let Some(left) = left {
                    left.collect_into(out);
                }
                if let Some(right) = right {
                    right.collect_into(out);
                }
            }
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.len(),
            Node::Internal { left, right } => {
                left.as_ref().map_or(0, |n| n.count()) + right.as_ref().map_or(0, |n| n.count())
            }
        }
    }

    /// Append the summaries `self` must copy from `other`; returns the number of
    /// structural inconsistencies met on the way
    ///
    /// Both subtrees are hashed once up front, so the walk itself only descends where
    /// the hashes differ.
    pub fn diff_into(&self, other: &Node, level: usize, out: &mut Vec<ItemSummary>) -> usize {
        Hashed::build(self).diff_into(&Hashed::build(other), level, out)
    }

    /// Remove `id` from the subtree rooted at this node (which sits at `level`)
    ///
    /// Returns whether this node is now empty, so the caller can drop it. Pruning
    /// happens as the recursion unwinds, which bounds cleanup to the traversed path.
    pub fn remove(&mut self, id: &[u8], level: usize) -> Result<bool, ApiError> {
        match self {
            Node::Leaf(leaf) => {
                leaf.remove(id).ok_or_else(|| not_found(id))?;
                Ok(leaf.is_empty())
            }
            Node::Internal { left, right } => {
                let slot = if bit_at(level, id)? == 1 {
                    &mut *left
                } else {
                    &mut *right
                };
                let child = slot.as_deref_mut().ok_or_else(|| not_found(id))?;
                if child.remove(id, level + 1)? {
                    *slot = None;
                }
                Ok(left.is_none() && right.is_none())
            }
        }
    }
}

/// A node paired with its hash and the hashes of everything below it
struct Hashed<'a> {
    node: &'a Node,
    hash: Hash,
    left: Option<Box<Hashed<'a>>>,
    right: Option<Box<Hashed<'a>>>,
}

impl<'a> Hashed<'a> {
    fn build(node: &'a Node) -> Self {
        match node {
            Node::Leaf(leaf) => Hashed {
                node,
                hash: leaf.hash(),
                left: None,
                right: None,
            },
            Node::Internal { left, right } => {
                let left = left.as_deref().map(|n| Box::new(Hashed::build(n)));
                let right = right.as_deref().map(|n| Box::new(Hashed::build(n)));
                let hash = digest_concat(
                    left.iter()
                        .chain(right.iter())
                        .map(|h| h.hash.as_slice()),
                );
                Hashed {
                    node,
                    hash,
                    left,
                    right,
                }
            }
        }
    }

    fn diff_into(&self, other: &Hashed<'_>, level: usize, out: &mut Vec<ItemSummary>) -> usize {
        if self.hash == other.hash {
            return 0;
        }

        match (self.node, other.node) {
            (Node::Leaf(mine), Node::Leaf(theirs)) => {
                mine.diff_into(theirs, out);
                0
            }
            (Node::Internal { .. }, Node::Internal { .. }) => {
                diff_child(&self.left, &other.left, level + 1, out)
                    + diff_child(&self.right, &other.right, level + 1, out)
            }
            _ => {
                let err = ApiError::StructuralInconsistency(format!(
                    "leaf compared against internal node at level {}",
                    level
                ));
                warn!(level, "{}", err);
                1
            }
        }
    }
}

fn diff_child(
    mine: &Option<Box<Hashed<'_>>>,
    theirs: &Option<Box<Hashed<'_>>>,
    level: usize,
    out: &mut Vec<ItemSummary>,
) -> usize {
    match (mine, theirs) {
        (None, Some(theirs)) => {
            theirs.node.collect_into(out);
            0
        }
        (Some(mine), Some(theirs)) => mine.diff_into(theirs, level, out),
        _ => 0,
    }
}

pub(crate) fn not_found(id: &[u8]) -> ApiError {
    ApiError::NotFound(format!(
        "id {} not found in merkle tree",
        String::from_utf8_lossy(id)
    ))
}
