//! Buckets
//!
//! A bucket owns its item records, the access-name index over them and the Merkle
//! tree built from their summaries. Every change to the records goes through
//! [`Bucket::add_item`] / [`Bucket::update_item`] so the tree always holds exactly
//! one summary per record.
//!
//! Buckets are pure in-memory state; persisting records and items is the job of the
//! node state layer (`crate::state`).

pub mod item;
pub mod options;

pub use item::{Item, ItemInfo, ItemOptions};
pub use options::BucketOptions;

use crate::error::ApiError;
use crate::tree::hasher::digest_concat;
use crate::tree::{ItemSummary, MerkleTree};
use crate::types::{generate_id, Hash};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Bucket metadata as persisted in the bucket record file and hashed into the state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketRecord {
    pub id: String,
    pub options: BucketOptions,
    pub deleted: bool,
    pub last_updated: i64,
}

/// Wire form of a bucket: metadata plus tree, without item records or bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    pub record: BucketRecord,
    pub tree: MerkleTree,
}

impl BucketState {
    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn state_hash(&self) -> Result<Hash, ApiError> {
        state_hash(&self.record, &self.tree)
    }
}

/// What a local bucket must take from a remote one
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketDiff {
    /// Remote metadata, present only when the remote bucket is strictly newer
    pub metadata: Option<BucketRecord>,
    /// Item summaries to fetch from the remote
    pub content: Vec<ItemSummary>,
}

impl BucketDiff {
    pub fn is_empty(&self) -> bool {
        self.metadata.is_none() && self.content.is_empty()
    }
}

/// A named container of items
#[derive(Debug, Clone)]
pub struct Bucket {
    id: String,
    options: BucketOptions,
    deleted: bool,
    last_updated: i64,
    item_by_access_name: HashMap<String, String>,
    items: BTreeMap<String, ItemInfo>,
    tree: MerkleTree,
}

impl Bucket {
    /// Create a bucket with a generated id
    pub fn new(options: BucketOptions, tree_depth: usize, now: i64) -> Self {
        Self::with_id(generate_id(), options, tree_depth, now)
    }

    pub fn with_id(id: impl Into<String>, options: BucketOptions, tree_depth: usize, now: i64) -> Self {
        Self {
            id: id.into(),
            options,
            deleted: false,
            last_updated: now,
            item_by_access_name: HashMap::new(),
            items: BTreeMap::new(),
            tree: MerkleTree::new(tree_depth),
        }
    }

    /// Rebuild an empty bucket from its persisted record
    pub fn from_record(record: BucketRecord, tree_depth: usize) -> Self {
        Self {
            id: record.id,
            options: record.options,
            deleted: record.deleted,
            last_updated: record.last_updated,
            item_by_access_name: HashMap::new(),
            items: BTreeMap::new(),
            tree: MerkleTree::new(tree_depth),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn options(&self) -> &BucketOptions {
        &self.options
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn last_updated(&self) -> i64 {
        self.last_updated
    }

    pub fn tree(&self) -> &MerkleTree {
        &self.tree
    }

    pub fn items(&self) -> &BTreeMap<String, ItemInfo> {
        &self.items
    }

    pub fn item(&self, item_id: &str) -> Result<&ItemInfo, ApiError> {
        self.items.get(item_id).ok_or_else(|| {
            ApiError::NotFound(format!("item {} in bucket {}", item_id, self.id))
        })
    }

    pub fn item_id_by_access_name(&self, access_name: &str) -> Result<&str, ApiError> {
        self.item_by_access_name
            .get(access_name)
            .map(String::as_str)
            .ok_or_else(|| {
                ApiError::NotFound(format!("access name {} in bucket {}", access_name, self.id))
            })
    }

    pub fn record(&self) -> BucketRecord {
        BucketRecord {
            id: self.id.clone(),
            options: self.options.clone(),
            deleted: self.deleted,
            last_updated: self.last_updated,
        }
    }

    pub fn to_state(&self) -> BucketState {
        BucketState {
            record: self.record(),
            tree: self.tree.clone(),
        }
    }

    /// Insert a new item record into the index and the tree
    pub fn add_item(&mut self, info: ItemInfo) -> Result<(), ApiError> {
        self.put_item_info(info)
    }

    /// Replace an item record, dropping the prior access name
    pub fn update_item(&mut self, info: ItemInfo) -> Result<(), ApiError> {
        self.put_item_info(info)
    }

    /// Tombstone an item; `NotFound` if it is absent or already deleted
    pub fn delete_item(&mut self, item_id: &str, now: i64) -> Result<ItemInfo, ApiError> {
        let mut info = match self.items.get(item_id) {
            Some(info) if !info.deleted => info.clone(),
            _ => {
                return Err(ApiError::NotFound(format!(
                    "item {} in bucket {}",
                    item_id, self.id
                )))
            }
        };
        info.deleted = true;
        info.last_updated = now;
        self.update_item(info.clone())?;
        Ok(info)
    }

    /// Replace the options wholesale and stamp `last_updated`
    pub fn set_options(&mut self, options: BucketOptions, last_updated: i64) {
        self.options = options;
        self.last_updated = last_updated;
    }

    /// Tombstone the bucket and every live item in it
    ///
    /// Returns the records tombstoned by the cascade.
    pub fn set_deleted(&mut self, now: i64) -> Result<Vec<ItemInfo>, ApiError> {
        let cascaded = self.tombstone_live_items(now)?;
        self.deleted = true;
        self.last_updated = now;
        Ok(cascaded)
    }

    /// Adopt a newer remote record as-is, timestamp included
    ///
    /// A record that deletes a live bucket cascades to its live items, exactly like a
    /// local deletion. Returns the records tombstoned by the cascade.
    pub fn apply_record(&mut self, record: &BucketRecord) -> Result<Vec<ItemInfo>, ApiError> {
        let cascaded = if record.deleted && !self.deleted {
            self.tombstone_live_items(record.last_updated)?
        } else {
            Vec::new()
        };
        self.options = record.options.clone();
        self.deleted = record.deleted;
        self.last_updated = record.last_updated;
        Ok(cascaded)
    }

    /// Tombstone every live item, each stamped `max(now, last_updated + 1)` so the
    /// tombstone is newer than any write it covers
    fn tombstone_live_items(&mut self, now: i64) -> Result<Vec<ItemInfo>, ApiError> {
        let live: Vec<(String, i64)> = self
            .items
            .values()
            .filter(|info| !info.deleted)
            .map(|info| (info.id.clone(), info.last_updated))
            .collect();

        let mut cascaded = Vec::with_capacity(live.len());
        for (item_id, last_updated) in live {
            cascaded.push(self.delete_item(&item_id, now.max(last_updated + 1))?);
        }
        Ok(cascaded)
    }

    /// Compare against a remote bucket
    pub fn diff(&self, other: &BucketState) -> BucketDiff {
        let metadata = if other.record.last_updated > self.last_updated {
            Some(other.record.clone())
        } else {
            None
        };
        BucketDiff {
            metadata,
            content: self.tree.diff(&other.tree),
        }
    }

    /// `hash(serialized record ++ tree root hash)`
    pub fn state_hash(&self) -> Result<Hash, ApiError> {
        state_hash(&self.record(), &self.tree)
    }

    fn put_item_info(&mut self, info: ItemInfo) -> Result<(), ApiError> {
        let summary = info.summary()?;
        self.tree.add(summary)?;

        if let Some(previous) = self.items.get(&info.id) {
            let previous_name = previous.access_name();
            if self.item_by_access_name.get(&previous_name) == Some(&info.id) {
                self.item_by_access_name.remove(&previous_name);
            }
        }
        self.item_by_access_name
            .insert(info.access_name(), info.id.clone());
        self.items.insert(info.id.clone(), info);
        Ok(())
    }
}

fn state_hash(record: &BucketRecord, tree: &MerkleTree) -> Result<Hash, ApiError> {
    let bytes = bincode::serialize(record)?;
    let root = tree.hash();
    Ok(digest_concat([bytes.as_slice(), root.as_slice()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::DEFAULT_TREE_DEPTH;

    fn bucket() -> Bucket {
        Bucket::with_id("bucket-0001", BucketOptions::new("assets", "/assets"), DEFAULT_TREE_DEPTH, 100)
    }

    fn item(id: &str, content: &[u8], now: i64) -> Item {
        Item::with_id(id, ItemOptions::new("file", "txt"), content.to_vec(), now)
    }

    #[test]
    fn test_add_item_indexes_access_name_and_tree() {
        let mut bucket = bucket();
        let item = item("item-0001", b"hello", 100);
        bucket.add_item(item.info()).unwrap();

        assert_eq!(bucket.item_id_by_access_name(&item.access_name()).unwrap(), "item-0001");
        assert_eq!(bucket.tree().len(), 1);
        assert!(bucket.tree().get(b"item-0001").is_some());
    }

    #[test]
    fn test_update_item_replaces_access_name() {
        let mut bucket = bucket();
        let mut item = item("item-0001", b"hello", 100);
        bucket.add_item(item.info()).unwrap();
        let old_name = item.access_name();

        item.set_content(b"goodbye".to_vec(), 110);
        bucket.update_item(item.info()).unwrap();

        assert!(bucket.item_id_by_access_name(&old_name).unwrap_err().is_not_found());
        assert_eq!(bucket.item_id_by_access_name(&item.access_name()).unwrap(), "item-0001");
        assert_eq!(bucket.tree().len(), 1);
        assert_eq!(
            bucket.tree().get(b"item-0001").unwrap(),
            &item.info().summary().unwrap()
        );
    }

    #[test]
    fn test_access_name_last_writer_wins() {
        let mut bucket = bucket();
        let first = item("item-0001", b"same", 100);
        let second = item("item-0002", b"same", 101);
        bucket.add_item(first.info()).unwrap();
        bucket.add_item(second.info()).unwrap();
        assert_eq!(bucket.item_id_by_access_name(&first.access_name()).unwrap(), "item-0002");

        // Re-indexing the first item must not steal back a name it no longer owns
        let mut renamed = first.clone();
        renamed.set_options(ItemOptions::new("other", "txt"), 102);
        bucket.update_item(renamed.info()).unwrap();
        assert_eq!(bucket.item_id_by_access_name(&second.access_name()).unwrap(), "item-0002");
    }

    #[test]
    fn test_delete_item_tombstones_and_rejects_repeat() {
        let mut bucket = bucket();
        bucket.add_item(item("item-0001", b"hello", 100).info()).unwrap();
        let before = bucket.tree().hash();

        let info = bucket.delete_item("item-0001", 120).unwrap();
        assert!(info.deleted);
        assert!(bucket.item("item-0001").unwrap().deleted);
        assert_ne!(bucket.tree().hash(), before);
        assert!(bucket.tree().get(b"item-0001").unwrap().deleted);

        assert!(bucket.delete_item("item-0001", 130).unwrap_err().is_not_found());
        assert!(bucket.delete_item("item-9999", 130).unwrap_err().is_not_found());
    }

    #[test]
    fn test_set_deleted_cascades_to_live_items() {
        let mut bucket = bucket();
        bucket.add_item(item("item-0001", b"a", 100).info()).unwrap();
        bucket.add_item(item("item-0002", b"b", 100).info()).unwrap();
        bucket.delete_item("item-0002", 105).unwrap();

        let cascaded = bucket.set_deleted(200).unwrap();
        let ids: Vec<&str> = cascaded.iter().map(|info| info.id.as_str()).collect();
        assert_eq!(ids, vec!["item-0001"]);
        assert_eq!(cascaded[0].last_updated, 200);
        assert!(bucket.is_deleted());
        assert_eq!(bucket.last_updated(), 200);
        assert!(bucket.items().values().all(|info| info.deleted));
        assert!(bucket.tree().entries().iter().all(|s| s.deleted));
    }

    #[test]
    fn test_diff_takes_options_only_when_remote_newer() {
        let local = bucket();
        let mut remote = local.clone();
        remote.set_options(BucketOptions::new("renamed", "/assets").with_gzip(true), 150);

        let diff = local.diff(&remote.to_state());
        assert_eq!(diff.metadata.unwrap().options.name, "renamed");
        assert!(diff.content.is_empty());

        let back = remote.diff(&local.to_state());
        assert!(back.metadata.is_none());
    }

    #[test]
    fn test_diff_reports_missing_items() {
        let local = bucket();
        let mut remote = local.clone();
        let item = item("item-0001", b"hello", 100);
        remote.add_item(item.info()).unwrap();

        let diff = local.diff(&remote.to_state());
        assert!(diff.metadata.is_none());
        assert_eq!(diff.content, vec![item.info().summary().unwrap()]);
    }

    #[test]
    fn test_state_hash_covers_metadata_and_tree() {
        let mut bucket = bucket();
        let h0 = bucket.state_hash().unwrap();
        assert_eq!(h0, bucket.to_state().state_hash().unwrap());

        bucket.add_item(item("item-0001", b"x", 100).info()).unwrap();
        let h1 = bucket.state_hash().unwrap();
        assert_ne!(h0, h1);

        bucket.set_options(BucketOptions::new("assets", "/assets").with_cache_ttl(60), 101);
        assert_ne!(bucket.state_hash().unwrap(), h1);
    }

    #[test]
    fn test_apply_record_adopts_remote_timestamp() {
        let mut local = bucket();
        let record = BucketRecord {
            id: "bucket-0001".to_string(),
            options: BucketOptions::new("new", "/new"),
            deleted: true,
            last_updated: 500,
        };
        assert!(local.apply_record(&record).unwrap().is_empty());
        assert_eq!(local.record(), record);
    }

    #[test]
    fn test_apply_deleting_record_cascades_past_newer_items() {
        let mut local = bucket();
        local.add_item(item("item-0001", b"a", 100).info()).unwrap();
        local.add_item(item("item-0002", b"b", 700).info()).unwrap();

        let record = BucketRecord {
            deleted: true,
            last_updated: 500,
            ..local.record()
        };
        let cascaded = local.apply_record(&record).unwrap();
        assert_eq!(cascaded.len(), 2);
        assert_eq!(local.item("item-0001").unwrap().last_updated, 500);
        // A write newer than the deletion is still covered by its tombstone
        assert_eq!(local.item("item-0002").unwrap().last_updated, 701);
        assert!(local.tree().entries().iter().all(|s| s.deleted));

        // Re-applying to an already deleted bucket cascades nothing
        assert!(local.apply_record(&record).unwrap().is_empty());
    }

    #[test]
    fn test_failed_tree_insert_leaves_index_untouched() {
        let mut local = Bucket::with_id("bucket-0001", BucketOptions::new("a", "/a"), 64, 100);
        let empty_hash = local.tree().hash();
        let short = item("ab", b"x", 100);
        let err = local.add_item(short.info()).unwrap_err();
        assert!(matches!(err, ApiError::InvalidIdentifier(_)));
        assert!(local.item("ab").unwrap_err().is_not_found());
        assert!(local.item_id_by_access_name(&short.access_name()).is_err());
        assert!(local.tree().is_empty());
        assert_eq!(local.tree().hash(), empty_hash);
    }
}
