//! Leaf buckets of the Merkle trie
//!
//! A leaf holds every summary whose id shares the leaf's bit-path. Entries are kept in
//! a `BTreeMap` so the leaf hash is always taken over summaries sorted by id.

use super::hasher::digest_concat;
use super::summary::ItemSummary;
use crate::types::{Hash, Identifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Colliding summaries at the bottom of the trie
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Leaf {
    entries: BTreeMap<Identifier, ItemSummary>,
}

impl Leaf {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash over the entries' hashes in id order
    pub fn hash(&self) -> Hash {
        digest_concat(self.entries.values().map(|s| s.hash.as_slice()))
    }

    /// Insert or overwrite the summary keyed by its id
    pub fn insert(&mut self, summary: ItemSummary) -> Option<ItemSummary> {
        self.entries.insert(summary.id.clone(), summary)
    }

    pub fn get(&self, id: &[u8]) -> Option<&ItemSummary> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &[u8]) -> bool {
        self.entries.contains_key(id)
    }

    pub fn remove(&mut self, id: &[u8]) -> Option<ItemSummary> {
        self.entries.remove(id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ItemSummary> {
        self.entries.values()
    }

    /// Append the entries `self` must copy from `other` to converge
    ///
    /// Shared ids with differing hashes are taken from `other` only when its
    /// `last_updated` is strictly greater. Equal timestamps keep the local entry.
    pub fn diff_into(&self, other: &Leaf, out: &mut Vec<ItemSummary>) {
        if self.hash() == other.hash() {
            return;
        }

        for (id, theirs) in &other.entries {
            match self.entries.get(id) {
                Some(mine) => {
                    if mine.hash != theirs.hash && theirs.last_updated > mine.last_updated {
                        out.push(theirs.clone());
                    }
                }
                None => out.push(theirs.clone()),
            }
        }
    }
}
