//! Serializable view of every bucket on a node, as served by `GetState`

use crate::bucket::BucketState;
use crate::error::ApiError;
use crate::tree::hasher::digest_concat;
use crate::types::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub buckets: BTreeMap<String, BucketState>,
}

impl StateSnapshot {
    /// Node fingerprint over the bucket state hashes in bucket id order
    pub fn fingerprint(&self) -> Result<Hash, ApiError> {
        let hashes = self
            .buckets
            .values()
            .map(BucketState::state_hash)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fingerprint_of(&hashes))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Combine bucket state hashes, already ordered by bucket id
pub(crate) fn fingerprint_of(hashes: &[Hash]) -> Hash {
    digest_concat(hashes.iter().map(|h| h.as_slice()))
}
