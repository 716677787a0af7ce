//! Bucket options: the mutable, replicated part of a bucket's metadata

use serde::{Deserialize, Serialize};

/// Replicated as a whole; the newer record wins wholesale
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketOptions {
    pub name: String,
    /// Unique across the buckets of a node
    pub canonical_path: String,
    pub cache_ttl_seconds: i64,
    pub gzip: bool,
}

impl BucketOptions {
    pub fn new(name: impl Into<String>, canonical_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            canonical_path: canonical_path.into(),
            cache_ttl_seconds: 0,
            gzip: false,
        }
    }

    pub fn with_cache_ttl(mut self, seconds: i64) -> Self {
        self.cache_ttl_seconds = seconds;
        self
    }

    pub fn with_gzip(mut self, gzip: bool) -> Self {
        self.gzip = gzip;
        self
    }
}
