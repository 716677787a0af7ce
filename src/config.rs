//! Configuration
//!
//! One [`NodeConfig`] per process, loaded once at startup and passed down to the
//! constructors that need it. Sources, lowest precedence first: built-in defaults,
//! the global file (`$XDG_CONFIG_HOME/bucketsync/config.toml`), an explicit file, and
//! `BUCKETSYNC__*` environment variables. The CLI applies its flags on top.

pub mod facade;
pub mod merge;
pub mod paths;
pub mod sources;

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;

use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::sync::{PeerInfo, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Largest supported tree depth; generated ids carry 160 bits
pub const MAX_TREE_DEPTH: usize = 160;

/// Node configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster-unique node id
    pub node_id: String,

    /// Root directory of the object store
    pub data_root: PathBuf,

    /// Address the peer server binds
    pub listen_address: String,

    /// Address other nodes use to reach this one; defaults to `listen_address`
    #[serde(default)]
    pub advertise_address: Option<String>,

    /// Peer to register with at startup
    #[serde(default)]
    pub seed_peer: Option<String>,

    /// Merkle tree depth; must be identical on every node of the cluster
    pub tree_depth: usize,

    pub sync_interval_ms: u64,

    pub request_timeout_ms: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    pub fn advertise_address(&self) -> &str {
        self.advertise_address
            .as_deref()
            .unwrap_or(&self.listen_address)
    }

    pub fn peer_info(&self) -> PeerInfo {
        PeerInfo::new(self.node_id.clone(), self.advertise_address())
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            interval: Duration::from_millis(self.sync_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    /// Check the values no node can run with
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.node_id.trim().is_empty() {
            return Err(ApiError::ConfigError("node_id must not be empty".to_string()));
        }
        if self.listen_address.trim().is_empty() {
            return Err(ApiError::ConfigError(
                "listen_address must not be empty".to_string(),
            ));
        }
        if self.advertise_address().trim().is_empty() {
            return Err(ApiError::ConfigError(
                "advertise_address must not be empty".to_string(),
            ));
        }
        if self.data_root.as_os_str().is_empty() {
            return Err(ApiError::ConfigError("data_root must not be empty".to_string()));
        }
        if self.tree_depth == 0 || self.tree_depth > MAX_TREE_DEPTH {
            return Err(ApiError::ConfigError(format!(
                "tree_depth must be between 1 and {}, got {}",
                MAX_TREE_DEPTH, self.tree_depth
            )));
        }
        if self.sync_interval_ms == 0 {
            return Err(ApiError::ConfigError(
                "sync_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ApiError::ConfigError(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
