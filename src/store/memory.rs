//! In-memory object store, used by tests and throwaway nodes

use super::{validate_object_id, ObjectStore};
use crate::bucket::{BucketRecord, Item};
use crate::error::StorageError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct StoredBucket {
    record: Option<BucketRecord>,
    items: BTreeMap<String, Item>,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    buckets: RwLock<BTreeMap<String, StoredBucket>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn load_item(&self, bucket_id: &str, item_id: &str) -> Result<Option<Item>, StorageError> {
        Ok(self
            .buckets
            .read()
            .get(bucket_id)
            .and_then(|b| b.items.get(item_id))
            .cloned())
    }

    fn save_item(&self, bucket_id: &str, item: &Item) -> Result<(), StorageError> {
        validate_object_id(bucket_id)?;
        validate_object_id(&item.id)?;
        self.buckets
            .write()
            .entry(bucket_id.to_string())
            .or_default()
            .items
            .insert(item.id.clone(), item.clone());
        Ok(())
    }

    fn list_items(&self, bucket_id: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .buckets
            .read()
            .get(bucket_id)
            .map(|b| b.items.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn load_bucket(&self, bucket_id: &str) -> Result<Option<BucketRecord>, StorageError> {
        Ok(self
            .buckets
            .read()
            .get(bucket_id)
            .and_then(|b| b.record.clone()))
    }

    fn save_bucket(&self, record: &BucketRecord) -> Result<(), StorageError> {
        validate_object_id(&record.id)?;
        self.buckets
            .write()
            .entry(record.id.clone())
            .or_default()
            .record = Some(record.clone());
        Ok(())
    }

    fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.buckets.read().keys().cloned().collect())
    }
}
