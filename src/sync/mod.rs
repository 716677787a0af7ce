//! Anti-entropy synchronization
//!
//! Peers are pinged on a fixed interval; a differing node fingerprint puts the peer in
//! `Mismatch` and triggers a pull of its bucket trees, after which only the items the
//! tree diff selects are fetched.

pub mod client;
pub mod peer;
pub mod service;

pub use client::{Connector, PeerClient, Registration};
pub use peer::{Peer, PeerInfo, PeerStatus, PeerView, PingOutcome};
pub use service::{MonitorHandle, PeerVisit, ReconcileReport, SyncConfig, SyncService, TickReport};
