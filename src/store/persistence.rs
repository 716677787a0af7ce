//! Filesystem object store
//!
//! Layout under the data root:
//!
//! ```text
//! <root>/<bucket_id>/.bucket          bincode BucketRecord
//! <root>/<bucket_id>/<item_id>.item   bincode Item
//! ```
//!
//! Every write goes to a sibling temporary file which is then renamed over the target.

use super::{validate_object_id, ObjectStore};
use crate::bucket::{BucketRecord, Item};
use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const BUCKET_RECORD_FILE: &str = ".bucket";
const ITEM_EXTENSION: &str = "item";

/// Object store rooted at a data directory
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Open the store, creating the data root if it does not exist
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket_id: &str) -> Result<PathBuf, StorageError> {
        validate_object_id(bucket_id)?;
        Ok(self.root.join(bucket_id))
    }

    fn item_path(&self, bucket_id: &str, item_id: &str) -> Result<PathBuf, StorageError> {
        validate_object_id(item_id)?;
        Ok(self
            .bucket_dir(bucket_id)?
            .join(format!("{}.{}", item_id, ITEM_EXTENSION)))
    }
}

impl ObjectStore for FsObjectStore {
    fn load_item(&self, bucket_id: &str, item_id: &str) -> Result<Option<Item>, StorageError> {
        read_record(&self.item_path(bucket_id, item_id)?)
    }

    fn save_item(&self, bucket_id: &str, item: &Item) -> Result<(), StorageError> {
        let path = self.item_path(bucket_id, &item.id)?;
        write_record(&path, item)
    }

    fn list_items(&self, bucket_id: &str) -> Result<Vec<String>, StorageError> {
        let dir = self.bucket_dir(bucket_id)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut ids = Vec::new();
        for entry in WalkDir::new(&dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ITEM_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    fn load_bucket(&self, bucket_id: &str) -> Result<Option<BucketRecord>, StorageError> {
        read_record(&self.bucket_dir(bucket_id)?.join(BUCKET_RECORD_FILE))
    }

    fn save_bucket(&self, record: &BucketRecord) -> Result<(), StorageError> {
        let path = self.bucket_dir(&record.id)?.join(BUCKET_RECORD_FILE);
        write_record(&path, record)
    }

    fn list_buckets(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_object_id(name).is_ok() {
                    ids.push(name.to_string());
                }
            }
        }
        Ok(ids)
    }
}

fn read_record<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StorageError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(bincode::deserialize(&bytes)?))
}

fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let bytes = bincode::serialize(value)?;
    let parent = path
        .parent()
        .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;
    fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StorageError::InvalidPath(path.display().to_string()))?;
    let temp_path = parent.join(format!("{}.tmp", file_name));

    fs::write(&temp_path, &bytes)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}
