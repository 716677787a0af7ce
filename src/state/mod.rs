//! Node State
//!
//! Every bucket hosted by a node, the canonical-path index over them and the object
//! store they persist into. All mutations, local or from reconciliation, go through
//! this type so the store, the item records and the trees stay in step.
//!
//! The node shares one instance behind a `parking_lot::RwLock` ([`SharedState`]).
//! Nothing here is async; callers must not hold the lock across an `.await`.

pub mod snapshot;

pub use snapshot::StateSnapshot;

use crate::bucket::{
    Bucket, BucketDiff, BucketOptions, BucketRecord, BucketState, Item, ItemInfo, ItemOptions,
};
use crate::error::ApiError;
use crate::store::ObjectStore;
use crate::types::{unix_now, Hash};
use parking_lot::RwLock;
use snapshot::fingerprint_of;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Node state shared between the request handlers and the sync monitor
pub type SharedState = Arc<RwLock<NodeState>>;

/// Result of comparing the local state against a peer's
#[derive(Debug, Default)]
pub struct StateDiff {
    /// Non-empty diffs by bucket id
    pub buckets: BTreeMap<String, BucketDiff>,
    /// Remote buckets that could not be mirrored locally
    pub skipped: Vec<String>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.skipped.is_empty()
    }
}

pub struct NodeState {
    buckets: BTreeMap<String, Bucket>,
    bucket_by_path: HashMap<String, String>,
    store: Arc<dyn ObjectStore>,
    tree_depth: usize,
}

impl std::fmt::Debug for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeState")
            .field("buckets", &self.buckets.len())
            .field("tree_depth", &self.tree_depth)
            .finish()
    }
}

impl NodeState {
    /// Empty state over `store`; nothing is read from it
    pub fn new(store: Arc<dyn ObjectStore>, tree_depth: usize) -> Self {
        Self {
            buckets: BTreeMap::new(),
            bucket_by_path: HashMap::new(),
            store,
            tree_depth,
        }
    }

    /// Rebuild the state from everything in `store`
    ///
    /// Failing to list the buckets is fatal. A bucket or item that cannot be read is
    /// skipped with a warning.
    pub fn load(store: Arc<dyn ObjectStore>, tree_depth: usize) -> Result<Self, ApiError> {
        let mut state = Self::new(store, tree_depth);
        let bucket_ids = state.store.list_buckets()?;

        for bucket_id in bucket_ids {
            let record = match state.store.load_bucket(&bucket_id) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    warn!(bucket_id = %bucket_id, "Skipping bucket directory without a record");
                    continue;
                }
                Err(e) => {
                    warn!(bucket_id = %bucket_id, error = %e, "Skipping unreadable bucket record");
                    continue;
                }
            };
            if let Some(owner) = state.bucket_by_path.get(&record.options.canonical_path) {
                warn!(
                    bucket_id = %bucket_id,
                    owner = %owner,
                    path = %record.options.canonical_path,
                    "Skipping bucket whose canonical path is already claimed"
                );
                continue;
            }

            let mut bucket = Bucket::from_record(record, tree_depth);
            let item_ids = match state.store.list_items(&bucket_id) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(bucket_id = %bucket_id, error = %e, "Failed to list bucket items");
                    Vec::new()
                }
            };
            for item_id in item_ids {
                match state.store.load_item(&bucket_id, &item_id) {
                    Ok(Some(item)) => {
                        if let Err(e) = bucket.add_item(item.info()) {
                            warn!(bucket_id = %bucket_id, item_id = %item_id, error = %e, "Skipping item");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(bucket_id = %bucket_id, item_id = %item_id, error = %e, "Skipping unreadable item");
                    }
                }
            }

            state.insert_bucket(bucket);
        }

        info!(buckets = state.buckets.len(), "Loaded node state");
        Ok(state)
    }

    pub fn tree_depth(&self) -> usize {
        self.tree_depth
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Node fingerprint: digest of every bucket state hash in bucket id order
    pub fn fingerprint(&self) -> Result<Hash, ApiError> {
        let hashes = self
            .buckets
            .values()
            .map(Bucket::state_hash)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(fingerprint_of(&hashes))
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            buckets: self
                .buckets
                .iter()
                .map(|(id, bucket)| (id.clone(), bucket.to_state()))
                .collect(),
        }
    }

    // Buckets

    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.values()
    }

    pub fn bucket(&self, bucket_id: &str) -> Result<&Bucket, ApiError> {
        self.buckets
            .get(bucket_id)
            .ok_or_else(|| ApiError::NotFound(format!("bucket {}", bucket_id)))
    }

    pub fn bucket_by_path(&self, canonical_path: &str) -> Result<&Bucket, ApiError> {
        self.bucket_by_path
            .get(canonical_path)
            .and_then(|id| self.buckets.get(id))
            .ok_or_else(|| ApiError::NotFound(format!("bucket at path {}", canonical_path)))
    }

    /// Create a bucket under a generated id
    pub fn create_bucket(&mut self, options: BucketOptions) -> Result<BucketRecord, ApiError> {
        let bucket = Bucket::new(options, self.tree_depth, unix_now());
        self.add_bucket(bucket)
    }

    pub fn create_bucket_with_id(
        &mut self,
        bucket_id: &str,
        options: BucketOptions,
    ) -> Result<BucketRecord, ApiError> {
        let bucket = Bucket::with_id(bucket_id, options, self.tree_depth, unix_now());
        self.add_bucket(bucket)
    }

    /// Replace a bucket's options
    pub fn update_bucket(
        &mut self,
        bucket_id: &str,
        options: BucketOptions,
    ) -> Result<BucketRecord, ApiError> {
        let current = self.live_bucket(bucket_id)?;
        let mut record = current.record();
        record.last_updated = next_timestamp(current.last_updated());
        record.options = options;
        self.apply_bucket_record(&record)?;
        Ok(record)
    }

    /// Tombstone a bucket and every live item in it
    pub fn delete_bucket(&mut self, bucket_id: &str) -> Result<BucketRecord, ApiError> {
        let store = Arc::clone(&self.store);
        let bucket = self.live_bucket_mut(bucket_id)?;
        let now = next_timestamp(bucket.last_updated());

        let cascaded = bucket.set_deleted(now)?;
        persist_tombstones(store.as_ref(), bucket_id, &cascaded)?;

        let record = bucket.record();
        store.save_bucket(&record)?;
        info!(bucket_id = %bucket_id, items = cascaded.len(), "Deleted bucket");
        Ok(record)
    }

    // Items

    pub fn create_item(
        &mut self,
        bucket_id: &str,
        options: ItemOptions,
        content: Vec<u8>,
    ) -> Result<ItemInfo, ApiError> {
        let store = Arc::clone(&self.store);
        let bucket = self.live_bucket_mut(bucket_id)?;

        let item = Item::new(options, content, unix_now());
        store.save_item(bucket_id, &item)?;
        let info = item.info();
        bucket.add_item(info.clone())?;
        debug!(bucket_id = %bucket_id, item_id = %info.id, size = info.size, "Created item");
        Ok(info)
    }

    pub fn replace_item_content(
        &mut self,
        bucket_id: &str,
        item_id: &str,
        content: Vec<u8>,
    ) -> Result<ItemInfo, ApiError> {
        self.modify_item(bucket_id, item_id, |item, now| item.set_content(content, now))
    }

    pub fn update_item_options(
        &mut self,
        bucket_id: &str,
        item_id: &str,
        options: ItemOptions,
    ) -> Result<ItemInfo, ApiError> {
        self.modify_item(bucket_id, item_id, |item, now| item.set_options(options, now))
    }

    /// Tombstone an item; `NotFound` if it is absent or already deleted
    pub fn delete_item(&mut self, bucket_id: &str, item_id: &str) -> Result<ItemInfo, ApiError> {
        self.modify_item(bucket_id, item_id, |item, now| item.tombstone(now))
    }

    /// Full stored item, tombstones included
    pub fn get_item(&self, bucket_id: &str, item_id: &str) -> Result<Item, ApiError> {
        let bucket = self.bucket(bucket_id)?;
        bucket.item(item_id)?;
        self.store
            .load_item(bucket_id, item_id)?
            .ok_or_else(|| ApiError::NotFound(format!("stored item {} in bucket {}", item_id, bucket_id)))
    }

    /// Live item served under `access_name`
    pub fn item_by_access_name(&self, bucket_id: &str, access_name: &str) -> Result<Item, ApiError> {
        let item_id = self.bucket(bucket_id)?.item_id_by_access_name(access_name)?;
        let item = self.get_item(bucket_id, item_id)?;
        if item.deleted {
            return Err(ApiError::NotFound(format!(
                "access name {} in bucket {}",
                access_name, bucket_id
            )));
        }
        Ok(item)
    }

    // Reconciliation

    /// Compare every remote bucket against the local one
    ///
    /// A remote bucket with no local counterpart gets a placeholder carrying the remote
    /// metadata, persisted before it is diffed. A placeholder whose canonical path is
    /// already claimed locally is skipped and reported in [`StateDiff::skipped`]. Only
    /// non-empty bucket diffs are returned.
    pub fn diff(
        &mut self,
        remote: &BTreeMap<String, BucketState>,
    ) -> Result<StateDiff, ApiError> {
        let mut diffs = StateDiff::default();

        for (bucket_id, remote_bucket) in remote {
            if !self.buckets.contains_key(bucket_id) {
                if let Err(e) = self.create_placeholder(&remote_bucket.record) {
                    warn!(bucket_id = %bucket_id, error = %e, "Skipping remote bucket");
                    diffs.skipped.push(bucket_id.clone());
                    continue;
                }
            }
            let local = self.bucket(bucket_id)?;

            if local.tree().depth() != remote_bucket.tree.depth() {
                warn!(
                    bucket_id = %bucket_id,
                    local_depth = local.tree().depth(),
                    remote_depth = remote_bucket.tree.depth(),
                    "Tree depth differs from peer"
                );
            }
            let diff = local.diff(remote_bucket);
            if !diff.is_empty() {
                diffs.buckets.insert(bucket_id.clone(), diff);
            }
        }

        Ok(diffs)
    }

    /// Adopt a newer remote bucket record, timestamp included
    pub fn apply_bucket_metadata(&mut self, record: &BucketRecord) -> Result<(), ApiError> {
        self.bucket(&record.id)?;
        self.apply_bucket_record(record)
    }

    /// Persist an item fetched from a peer and index it
    ///
    /// Returns `false` without touching anything when the local copy is newer. A live
    /// item arriving in a deleted bucket is stored as a tombstone stamped past both the
    /// item and the deletion.
    pub fn store_remote_item(&mut self, bucket_id: &str, item: &Item) -> Result<bool, ApiError> {
        let store = Arc::clone(&self.store);
        let bucket = self
            .buckets
            .get_mut(bucket_id)
            .ok_or_else(|| ApiError::NotFound(format!("bucket {}", bucket_id)))?;

        if let Ok(local) = bucket.item(&item.id) {
            if local.last_updated > item.last_updated {
                debug!(bucket_id = %bucket_id, item_id = %item.id, "Local item is newer; keeping it");
                return Ok(false);
            }
        }

        let mut item = item.clone();
        if bucket.is_deleted() && !item.deleted {
            debug!(bucket_id = %bucket_id, item_id = %item.id, "Tombstoning item of a deleted bucket");
            item.tombstone(bucket.last_updated().max(item.last_updated + 1));
        }

        store.save_item(bucket_id, &item)?;
        bucket.update_item(item.info())?;
        Ok(true)
    }

    fn add_bucket(&mut self, bucket: Bucket) -> Result<BucketRecord, ApiError> {
        let record = bucket.record();
        self.check_unclaimed(&record)?;
        self.store.save_bucket(&record)?;
        self.insert_bucket(bucket);
        info!(bucket_id = %record.id, path = %record.options.canonical_path, "Created bucket");
        Ok(record)
    }

    fn create_placeholder(&mut self, record: &BucketRecord) -> Result<(), ApiError> {
        self.check_unclaimed(record)?;
        self.store.save_bucket(record)?;
        self.insert_bucket(Bucket::from_record(record.clone(), self.tree_depth));
        debug!(bucket_id = %record.id, "Created placeholder for remote bucket");
        Ok(())
    }

    fn check_unclaimed(&self, record: &BucketRecord) -> Result<(), ApiError> {
        if self.buckets.contains_key(&record.id) {
            return Err(ApiError::Conflict(format!("bucket {} already exists", record.id)));
        }
        if let Some(owner) = self.bucket_by_path.get(&record.options.canonical_path) {
            return Err(ApiError::Conflict(format!(
                "canonical path {} already claimed by bucket {}",
                record.options.canonical_path, owner
            )));
        }
        Ok(())
    }

    fn insert_bucket(&mut self, bucket: Bucket) {
        self.bucket_by_path
            .insert(bucket.options().canonical_path.clone(), bucket.id().to_string());
        self.buckets.insert(bucket.id().to_string(), bucket);
    }

    /// Apply a full record to an existing bucket, moving its path claim, and persist it
    fn apply_bucket_record(&mut self, record: &BucketRecord) -> Result<(), ApiError> {
        let new_path = &record.options.canonical_path;
        if let Some(owner) = self.bucket_by_path.get(new_path) {
            if owner != &record.id {
                return Err(ApiError::Conflict(format!(
                    "canonical path {} already claimed by bucket {}",
                    new_path, owner
                )));
            }
        }

        self.store.save_bucket(record)?;
        let bucket = self
            .buckets
            .get_mut(&record.id)
            .ok_or_else(|| ApiError::NotFound(format!("bucket {}", record.id)))?;
        let old_path = bucket.options().canonical_path.clone();
        let cascaded = bucket.apply_record(record)?;
        persist_tombstones(self.store.as_ref(), &record.id, &cascaded)?;
        if !cascaded.is_empty() {
            info!(bucket_id = %record.id, items = cascaded.len(), "Bucket deleted by peer");
        }

        if &old_path != new_path {
            self.bucket_by_path.remove(&old_path);
            self.bucket_by_path.insert(new_path.clone(), record.id.clone());
        }
        Ok(())
    }

    fn live_bucket(&self, bucket_id: &str) -> Result<&Bucket, ApiError> {
        match self.buckets.get(bucket_id) {
            Some(bucket) if !bucket.is_deleted() => Ok(bucket),
            _ => Err(ApiError::NotFound(format!("bucket {}", bucket_id))),
        }
    }

    fn live_bucket_mut(&mut self, bucket_id: &str) -> Result<&mut Bucket, ApiError> {
        match self.buckets.get_mut(bucket_id) {
            Some(bucket) if !bucket.is_deleted() => Ok(bucket),
            _ => Err(ApiError::NotFound(format!("bucket {}", bucket_id))),
        }
    }

    /// Load a live item, let `change` edit it with a fresh timestamp, persist and re-index
    fn modify_item<F>(&mut self, bucket_id: &str, item_id: &str, change: F) -> Result<ItemInfo, ApiError>
    where
        F: FnOnce(&mut Item, i64),
    {
        let store = Arc::clone(&self.store);
        let bucket = self.live_bucket_mut(bucket_id)?;
        let previous = match bucket.item(item_id) {
            Ok(info) if !info.deleted => info.last_updated,
            _ => {
                return Err(ApiError::NotFound(format!(
                    "item {} in bucket {}",
                    item_id, bucket_id
                )))
            }
        };

        let mut item = store.load_item(bucket_id, item_id)?.ok_or_else(|| {
            ApiError::NotFound(format!("stored item {} in bucket {}", item_id, bucket_id))
        })?;
        change(&mut item, next_timestamp(previous));
        store.save_item(bucket_id, &item)?;

        let info = item.info();
        bucket.update_item(info.clone())?;
        Ok(info)
    }
}

/// Write the tombstones a bucket cascade produced over the stored items
fn persist_tombstones(
    store: &dyn ObjectStore,
    bucket_id: &str,
    tombstoned: &[ItemInfo],
) -> Result<(), ApiError> {
    for info in tombstoned {
        match store.load_item(bucket_id, &info.id)? {
            Some(mut item) => {
                item.tombstone(info.last_updated);
                store.save_item(bucket_id, &item)?;
            }
            None => {
                warn!(bucket_id = %bucket_id, item_id = %info.id, "Tombstoned item has no stored object");
            }
        }
    }
    Ok(())
}

/// Wall-clock now, forced past `previous` so local edits always win last-write-wins
fn next_timestamp(previous: i64) -> i64 {
    unix_now().max(previous + 1)
}
