//! Core types shared by the tree, bucket and sync layers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Hash: 256-bit BLAKE3 digest
pub type Hash = [u8; 32];

/// Identifier: opaque byte string naming a bucket or item; doubles as the tree bit-path
pub type Identifier = Vec<u8>;

/// Length in hex characters of generated bucket and item ids
pub const GENERATED_ID_LEN: usize = 20;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique bucket or item id
///
/// Ids are the leading hex characters of a BLAKE3 digest over wall-clock nanos,
/// the process id and a process-wide counter, so every byte of the id is spread
/// evenly over the tree's bit-paths.
pub fn generate_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = blake3::Hasher::new();
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&counter.to_le_bytes());
    let digest = hasher.finalize();

    let mut id = hex::encode(digest.as_bytes());
    id.truncate(GENERATED_ID_LEN);
    id
}

/// Current time as unix milliseconds; the unit of every `last_updated`
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
