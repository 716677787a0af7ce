//! Bucketsync: clustered bucket storage with Merkle-tree anti-entropy
//!
//! Every node keeps a set of buckets, each holding named items, and summarizes each
//! bucket's contents in a fixed-depth Merkle tree. Nodes gossip membership, compare a
//! whole-state fingerprint on every ping, and reconcile bucket by bucket when the
//! fingerprints disagree.

pub mod bucket;
pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod state;
pub mod store;
pub mod sync;
pub mod testing;
pub mod tooling;
pub mod transport;
pub mod tree;
pub mod types;
