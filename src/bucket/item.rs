//! Items: the full stored object and the in-memory record a bucket keeps for it

use crate::error::ApiError;
use crate::tree::hasher::digest;
use crate::tree::ItemSummary;
use crate::types::{generate_id, Hash};
use serde::{Deserialize, Serialize};

/// Per-item options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOptions {
    pub name: String,
    pub ext: String,
    pub cache_ttl: i64,
    pub gzip: bool,
}

impl ItemOptions {
    pub fn new(name: impl Into<String>, ext: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ext: ext.into(),
            cache_ttl: 0,
            gzip: false,
        }
    }
}

/// Full object including its bytes; this is the record the object store persists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    /// Hash of the raw bytes
    pub fingerprint: Hash,
    /// `None` once tombstoned
    pub content: Option<Vec<u8>>,
    pub size: u64,
    pub last_updated: i64,
    pub deleted: bool,
    pub options: ItemOptions,
}

impl Item {
    /// Create a new item with a generated id
    pub fn new(options: ItemOptions, content: Vec<u8>, now: i64) -> Self {
        Self::with_id(generate_id(), options, content, now)
    }

    pub fn with_id(id: impl Into<String>, options: ItemOptions, content: Vec<u8>, now: i64) -> Self {
        Self {
            id: id.into(),
            fingerprint: digest(&content),
            size: content.len() as u64,
            content: Some(content),
            last_updated: now,
            deleted: false,
            options,
        }
    }

    /// Replace the bytes and refresh fingerprint, size and timestamp
    pub fn set_content(&mut self, content: Vec<u8>, now: i64) {
        self.fingerprint = digest(&content);
        self.size = content.len() as u64;
        self.content = Some(content);
        self.deleted = false;
        self.last_updated = now;
    }

    pub fn set_options(&mut self, options: ItemOptions, now: i64) {
        self.options = options;
        self.last_updated = now;
    }

    /// Soft-delete: clear the bytes but keep the record so the deletion replicates
    pub fn tombstone(&mut self, now: i64) {
        self.content = None;
        self.deleted = true;
        self.last_updated = now;
    }

    pub fn access_name(&self) -> String {
        access_name(&self.options, &self.fingerprint)
    }

    /// In-memory record for the owning bucket
    pub fn info(&self) -> ItemInfo {
        ItemInfo {
            id: self.id.clone(),
            fingerprint: self.fingerprint,
            size: self.size,
            options: self.options.clone(),
            last_updated: self.last_updated,
            deleted: self.deleted,
        }
    }
}

/// What a bucket keeps in memory per item; everything but the bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInfo {
    pub id: String,
    pub fingerprint: Hash,
    pub size: u64,
    pub options: ItemOptions,
    pub last_updated: i64,
    pub deleted: bool,
}

impl ItemInfo {
    /// Name under which the item is served: `{name}.{hex fingerprint}.{ext}`
    pub fn access_name(&self) -> String {
        access_name(&self.options, &self.fingerprint)
    }

    /// Tree entry for this record
    ///
    /// The entry hash covers the serialized record (fingerprint first), so any change
    /// to content, options, timestamp or tombstone yields a different hash.
    pub fn summary(&self) -> Result<ItemSummary, ApiError> {
        let bytes = bincode::serialize(self)?;
        Ok(ItemSummary {
            id: self.id.as_bytes().to_vec(),
            fingerprint: self.fingerprint,
            hash: digest(&bytes),
            last_updated: self.last_updated,
            deleted: self.deleted,
        })
    }
}

fn access_name(options: &ItemOptions, fingerprint: &Hash) -> String {
    format!("{}.{}.{}", options.name, hex::encode(fingerprint), options.ext)
}
