//! Object Store
//!
//! Persistence boundary for bucket records and full items. Objects are addressed only
//! by `(bucket id, item id)`; the store knows nothing about trees or indexes.

pub mod memory;
pub mod persistence;

pub use memory::MemoryObjectStore;
pub use persistence::FsObjectStore;

use crate::bucket::{BucketRecord, Item};
use crate::error::StorageError;

/// Object store interface
///
/// Implementations are called with the node state write lock held, so they must not
/// block on anything that could call back into the node.
pub trait ObjectStore: Send + Sync {
    fn load_item(&self, bucket_id: &str, item_id: &str) -> Result<Option<Item>, StorageError>;
    fn save_item(&self, bucket_id: &str, item: &Item) -> Result<(), StorageError>;
    /// Ids of every item stored for the bucket; empty if the bucket has no objects
    fn list_items(&self, bucket_id: &str) -> Result<Vec<String>, StorageError>;

    fn load_bucket(&self, bucket_id: &str) -> Result<Option<BucketRecord>, StorageError>;
    fn save_bucket(&self, record: &BucketRecord) -> Result<(), StorageError>;
    /// Ids of every bucket in the store
    fn list_buckets(&self) -> Result<Vec<String>, StorageError>;
}

/// Reject ids that cannot be used as a single path component
pub fn validate_object_id(id: &str) -> Result<(), StorageError> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidPath(format!("invalid object id: {:?}", id)))
    }
}
