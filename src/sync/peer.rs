//! Peers and their health state machine

use super::client::PeerClient;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sync status of a peer as seen from this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerStatus {
    /// Reachable and, as of the last check, in sync
    Ok,
    /// Reachable with a different fingerprint; cleared only by a completed reconciliation
    Mismatch,
    /// Last ping failed or timed out
    Down,
}

/// What a single ping observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    Failed,
    Matched,
    Mismatched,
}

impl PeerStatus {
    /// Status after a ping with the given outcome
    pub fn after_ping(self, outcome: PingOutcome) -> PeerStatus {
        match (self, outcome) {
            (_, PingOutcome::Failed) => PeerStatus::Down,
            (_, PingOutcome::Mismatched) => PeerStatus::Mismatch,
            (PeerStatus::Mismatch, PingOutcome::Matched) => PeerStatus::Mismatch,
            (_, PingOutcome::Matched) => PeerStatus::Ok,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::Ok => "ok",
            PeerStatus::Mismatch => "mismatch",
            PeerStatus::Down => "down",
        }
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a cluster member as exchanged during registration
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: String,
    pub address: String,
}

impl PeerInfo {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// A known peer with its client handle
#[derive(Clone)]
pub struct Peer {
    pub info: PeerInfo,
    pub status: PeerStatus,
    pub client: Arc<dyn PeerClient>,
}

impl Peer {
    /// New peers start out `Ok` until the first ping says otherwise
    pub fn new(info: PeerInfo, client: Arc<dyn PeerClient>) -> Self {
        Self {
            info,
            status: PeerStatus::Ok,
            client,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.info.id)
            .field("address", &self.info.address)
            .field("status", &self.status)
            .finish()
    }
}

/// Peer listing entry for `GetPeers` and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerView {
    pub id: String,
    pub address: String,
    pub status: PeerStatus,
}

impl From<&Peer> for PeerView {
    fn from(peer: &Peer) -> Self {
        Self {
            id: peer.info.id.clone(),
            address: peer.info.address.clone(),
            status: peer.status,
        }
    }
}
