//! Error types
//!
//! `StorageError` covers the persistence boundary, `ApiError` is what every node-level
//! operation returns.

use thiserror::Error;

/// Errors raised by the object store and record codecs
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Codec(err.to_string())
    }
}

/// Errors returned by tree, bucket, state and sync operations
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bucket, item or tree entry absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Canonical bucket path already claimed by another bucket
    #[error("conflict: {0}")]
    Conflict(String),

    /// A leaf was compared against an internal node
    #[error("merkle tree inconsistency: {0}")]
    StructuralInconsistency(String),

    /// RPC failure or timeout
    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl ApiError {
    /// Whether this error reports a missing bucket, item or tree entry
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}

impl From<bincode::Error> for ApiError {
    fn from(err: bincode::Error) -> Self {
        ApiError::StorageError(StorageError::from(err))
    }
}
