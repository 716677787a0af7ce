//! Built-in defaults, the lowest-precedence layer

use crate::config::xdg;
use crate::tree::DEFAULT_TREE_DEPTH;
use crate::types::generate_id;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

pub const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:7400";
pub const DEFAULT_SYNC_INTERVAL_MS: i64 = 1000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: i64 = 5000;

/// Builder seeded with every default
///
/// Without a configured `node_id` each start gets a fresh generated one.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let data_root = xdg::default_data_root()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "bucketsync-data".to_string());

    Config::builder()
        .set_default("node_id", format!("node-{}", generate_id()))?
        .set_default("data_root", data_root)?
        .set_default("listen_address", DEFAULT_LISTEN_ADDRESS)?
        .set_default("tree_depth", DEFAULT_TREE_DEPTH as i64)?
        .set_default("sync_interval_ms", DEFAULT_SYNC_INTERVAL_MS)?
        .set_default("request_timeout_ms", DEFAULT_REQUEST_TIMEOUT_MS)
}
