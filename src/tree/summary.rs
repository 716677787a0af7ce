//! Tree entries
//!
//! An `ItemSummary` is what a bucket's Merkle tree stores and what tree diffs return:
//! enough to compare two replicas of an item without moving its bytes.

use crate::types::{Hash, Identifier};
use serde::{Deserialize, Serialize};

/// Compact, content-addressable representation of an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    /// Item id; also the bit-path through the tree
    pub id: Identifier,
    /// Hash of the item's raw bytes
    pub fingerprint: Hash,
    /// Entry hash, fixed when the summary is produced
    pub hash: Hash,
    /// Unix milliseconds of the last write
    pub last_updated: i64,
    /// Tombstone flag
    pub deleted: bool,
}

impl ItemSummary {
    /// Build a summary whose entry hash is derived from the fingerprint alone
    ///
    /// The bucket layer derives richer entry hashes (see `ItemInfo::summary`); this
    /// constructor is for callers that only track content.
    pub fn from_parts(id: Identifier, fingerprint: Hash, last_updated: i64, deleted: bool) -> Self {
        let hash = super::hasher::digest_concat([
            fingerprint.as_slice(),
            &last_updated.to_le_bytes(),
            &[deleted as u8],
        ]);
        Self {
            id,
            fingerprint,
            hash,
            last_updated,
            deleted,
        }
    }

    /// Id rendered for logs and for store lookups
    pub fn id_lossy(&self) -> String {
        String::from_utf8_lossy(&self.id).into_owned()
    }
}
