//! CLI Tooling
//!
//! Command-line interface for running a node, querying running nodes over the peer
//! protocol, and administering a node's data root while the node is stopped.

use crate::bucket::{BucketOptions, Item, ItemInfo, ItemOptions};
use crate::config::{ConfigLoader, NodeConfig};
use crate::error::ApiError;
use crate::node::Node;
use crate::state::NodeState;
use crate::store::FsObjectStore;
use crate::sync::{PeerClient, PeerView};
use crate::transport::TcpPeerClient;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// bucketsync - clustered bucket storage with Merkle-tree anti-entropy
#[derive(Parser)]
#[command(name = "bucketsync")]
#[command(about = "Clustered bucket storage with Merkle-tree anti-entropy replication")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file, layered over the global config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a node until interrupted
    Serve(ServeArgs),
    /// Ping a node and print its fingerprint
    Ping {
        address: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the peers a node knows
    Peers {
        address: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the buckets a node reports
    State {
        address: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Print the effective configuration
    Config {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Manage buckets in the local data root (node must be stopped)
    Bucket {
        #[command(subcommand)]
        command: BucketCommands,
    },
    /// Manage items in the local data root (node must be stopped)
    Item {
        #[command(subcommand)]
        command: ItemCommands,
    },
}

/// Overrides for `serve`; unset flags keep the configured value
#[derive(Args, Debug, Default, Clone)]
pub struct ServeArgs {
    #[arg(long)]
    pub node_id: Option<String>,
    #[arg(long)]
    pub data_root: Option<PathBuf>,
    /// Address to bind
    #[arg(long)]
    pub listen: Option<String>,
    /// Address peers should use to reach this node
    #[arg(long)]
    pub advertise: Option<String>,
    /// Peer to register with on startup
    #[arg(long)]
    pub seed: Option<String>,
    #[arg(long)]
    pub tree_depth: Option<usize>,
    #[arg(long)]
    pub sync_interval_ms: Option<u64>,
}

impl ServeArgs {
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(v) = &self.node_id {
            config.node_id = v.clone();
        }
        if let Some(v) = &self.data_root {
            config.data_root = v.clone();
        }
        if let Some(v) = &self.listen {
            config.listen_address = v.clone();
        }
        if let Some(v) = &self.advertise {
            config.advertise_address = Some(v.clone());
        }
        if let Some(v) = &self.seed {
            config.seed_peer = Some(v.clone());
        }
        if let Some(v) = self.tree_depth {
            config.tree_depth = v;
        }
        if let Some(v) = self.sync_interval_ms {
            config.sync_interval_ms = v;
        }
    }
}

#[derive(Subcommand)]
pub enum BucketCommands {
    /// Create a bucket
    Create {
        #[arg(long)]
        name: String,
        /// Canonical path; must be unique on the node
        #[arg(long)]
        path: String,
        /// Use this id instead of a generated one
        #[arg(long)]
        id: Option<String>,
        #[arg(long, default_value = "0")]
        cache_ttl: i64,
        #[arg(long)]
        gzip: bool,
    },
    /// Change bucket options
    Update {
        bucket_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        path: Option<String>,
        #[arg(long)]
        cache_ttl: Option<i64>,
        #[arg(long)]
        gzip: Option<bool>,
    },
    /// Tombstone a bucket and all of its items
    Delete { bucket_id: String },
    /// List buckets
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum ItemCommands {
    /// Store a file as a new item
    Put {
        bucket_id: String,
        file: PathBuf,
        /// Item name; defaults to the file stem
        #[arg(long)]
        name: Option<String>,
        /// Item extension; defaults to the file extension
        #[arg(long)]
        ext: Option<String>,
    },
    /// Replace an item's content with a file
    Replace {
        bucket_id: String,
        item_id: String,
        file: PathBuf,
    },
    /// Change item options
    Options {
        bucket_id: String,
        item_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        ext: Option<String>,
        #[arg(long)]
        cache_ttl: Option<i64>,
        #[arg(long)]
        gzip: Option<bool>,
    },
    /// Write an item's content, looked up by id or access name
    Get {
        bucket_id: String,
        key: String,
        /// Destination file; prints a summary when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Tombstone an item
    Delete { bucket_id: String, item_id: String },
    /// List items of a bucket
    List {
        bucket_id: String,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

/// CLI context: the loaded configuration every command runs against
pub struct CliContext {
    config: NodeConfig,
}

impl CliContext {
    pub fn new(config_path: Option<&Path>) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Ok(Self { config })
    }

    pub fn from_config(config: NodeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Apply the global logging flags on top of the configured logging section
    pub fn apply_logging_flags(&mut self, cli: &Cli) {
        let logging = &mut self.config.logging;
        if let Some(level) = &cli.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &cli.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &cli.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &cli.log_file {
            logging.file = Some(file.clone());
        }
    }

    /// Run a command and return what should be printed
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Serve(args) => self.handle_serve(args).await,
            Commands::Ping { address, format } => self.handle_ping(address, format).await,
            Commands::Peers { address, format } => self.handle_peers(address, format).await,
            Commands::State { address, format } => self.handle_state(address, format).await,
            Commands::Config { format } => self.handle_config(format),
            Commands::Bucket { command } => self.handle_bucket(command),
            Commands::Item { command } => self.handle_item(command),
        }
    }

    async fn handle_serve(&self, args: &ServeArgs) -> Result<String, ApiError> {
        let mut config = self.config.clone();
        args.apply(&mut config);
        let node = Node::open(config)?;
        let node_id = node.config().node_id.clone();

        node.run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

        info!(node_id = %node_id, "Node stopped");
        Ok(format!("Node {} stopped", node_id))
    }

    fn client(&self, address: &str) -> TcpPeerClient {
        TcpPeerClient::new(address, self.config.sync_config().request_timeout)
    }

    async fn handle_ping(&self, address: &str, format: &str) -> Result<String, ApiError> {
        let fingerprint = hex::encode(self.client(address).ping().await?);
        Ok(match format {
            "json" => to_json(&json!({ "address": address, "fingerprint": fingerprint })),
            _ => format!("{} fingerprint {}", address, fingerprint),
        })
    }

    async fn handle_peers(&self, address: &str, format: &str) -> Result<String, ApiError> {
        let peers = self.client(address).get_peers().await?;
        Ok(match format {
            "json" => to_json(&json!({ "peers": peers, "total": peers.len() })),
            _ => format_peers_text(&peers),
        })
    }

    async fn handle_state(&self, address: &str, format: &str) -> Result<String, ApiError> {
        let buckets = self.client(address).get_state().await?;
        let rows: Vec<_> = buckets
            .values()
            .map(|b| -> Result<serde_json::Value, ApiError> {
                Ok(json!({
                    "id": b.record.id,
                    "name": b.record.options.name,
                    "canonical_path": b.record.options.canonical_path,
                    "deleted": b.record.deleted,
                    "last_updated": b.record.last_updated,
                    "items": b.tree.len(),
                    "state_hash": hex::encode(b.state_hash()?),
                }))
            })
            .collect::<Result<_, _>>()?;

        Ok(match format {
            "json" => to_json(&json!({ "buckets": rows, "total": rows.len() })),
            _ => {
                if rows.is_empty() {
                    return Ok("No buckets".to_string());
                }
                let mut out = String::new();
                for b in buckets.values() {
                    out.push_str(&format!(
                        "{}  {}  {} items{}\n",
                        b.record.id,
                        b.record.options.canonical_path,
                        b.tree.len(),
                        if b.record.deleted { "  (deleted)" } else { "" }
                    ));
                }
                out.trim_end().to_string()
            }
        })
    }

    fn handle_config(&self, format: &str) -> Result<String, ApiError> {
        match format {
            "json" => serde_json::to_string_pretty(&self.config)
                .map_err(|e| ApiError::ConfigError(e.to_string())),
            _ => toml::to_string_pretty(&self.config).map_err(|e| ApiError::ConfigError(e.to_string())),
        }
    }

    fn open_state(&self) -> Result<NodeState, ApiError> {
        let store = FsObjectStore::open(&self.config.data_root)?;
        NodeState::load(Arc::new(store), self.config.tree_depth)
    }

    fn handle_bucket(&self, command: &BucketCommands) -> Result<String, ApiError> {
        let mut state = self.open_state()?;
        match command {
            BucketCommands::Create {
                name,
                path,
                id,
                cache_ttl,
                gzip,
            } => {
                let options = BucketOptions::new(name, path)
                    .with_cache_ttl(*cache_ttl)
                    .with_gzip(*gzip);
                let record = match id {
                    Some(id) => state.create_bucket_with_id(id, options)?,
                    None => state.create_bucket(options)?,
                };
                Ok(format!("Created bucket {} at {}", record.id, record.options.canonical_path))
            }
            BucketCommands::Update {
                bucket_id,
                name,
                path,
                cache_ttl,
                gzip,
            } => {
                let mut options = state.bucket(bucket_id)?.options().clone();
                if let Some(name) = name {
                    options.name = name.clone();
                }
                if let Some(path) = path {
                    options.canonical_path = path.clone();
                }
                if let Some(ttl) = cache_ttl {
                    options.cache_ttl_seconds = *ttl;
                }
                if let Some(gzip) = gzip {
                    options.gzip = *gzip;
                }
                let record = state.update_bucket(bucket_id, options)?;
                Ok(format!("Updated bucket {}", record.id))
            }
            BucketCommands::Delete { bucket_id } => {
                state.delete_bucket(bucket_id)?;
                Ok(format!("Deleted bucket {}", bucket_id))
            }
            BucketCommands::List { format } => {
                let buckets: Vec<_> = state.buckets().collect();
                match format.as_str() {
                    "json" => {
                        let rows: Vec<_> = buckets
                            .iter()
                            .map(|b| {
                                json!({
                                    "id": b.id(),
                                    "options": b.options(),
                                    "deleted": b.is_deleted(),
                                    "last_updated": b.last_updated(),
                                    "items": b.items().len(),
                                })
                            })
                            .collect();
                        Ok(to_json(&json!({ "buckets": rows, "total": rows.len() })))
                    }
                    _ => {
                        if buckets.is_empty() {
                            return Ok("No buckets".to_string());
                        }
                        let lines: Vec<String> = buckets
                            .iter()
                            .map(|b| {
                                format!(
                                    "{}  {}  {}  {} items{}",
                                    b.id(),
                                    b.options().canonical_path,
                                    b.options().name,
                                    b.items().len(),
                                    if b.is_deleted() { "  (deleted)" } else { "" }
                                )
                            })
                            .collect();
                        Ok(lines.join("\n"))
                    }
                }
            }
        }
    }

    fn handle_item(&self, command: &ItemCommands) -> Result<String, ApiError> {
        let mut state = self.open_state()?;
        match command {
            ItemCommands::Put {
                bucket_id,
                file,
                name,
                ext,
            } => {
                let content = read_file(file)?;
                let name = name.clone().unwrap_or_else(|| file_part(file.file_stem()));
                let ext = ext.clone().unwrap_or_else(|| file_part(file.extension()));
                let info = state.create_item(bucket_id, ItemOptions::new(name, ext), content)?;
                Ok(format!("Stored item {} as {}", info.id, info.access_name()))
            }
            ItemCommands::Replace {
                bucket_id,
                item_id,
                file,
            } => {
                let info = state.replace_item_content(bucket_id, item_id, read_file(file)?)?;
                Ok(format!("Replaced item {}; now {}", info.id, info.access_name()))
            }
            ItemCommands::Options {
                bucket_id,
                item_id,
                name,
                ext,
                cache_ttl,
                gzip,
            } => {
                let mut options = state.bucket(bucket_id)?.item(item_id)?.options.clone();
                if let Some(name) = name {
                    options.name = name.clone();
                }
                if let Some(ext) = ext {
                    options.ext = ext.clone();
                }
                if let Some(ttl) = cache_ttl {
                    options.cache_ttl = *ttl;
                }
                if let Some(gzip) = gzip {
                    options.gzip = *gzip;
                }
                let info = state.update_item_options(bucket_id, item_id, options)?;
                Ok(format!("Updated item {}; now {}", info.id, info.access_name()))
            }
            ItemCommands::Get {
                bucket_id,
                key,
                output,
            } => {
                let item = match state.get_item(bucket_id, key) {
                    Ok(item) => item,
                    Err(e) if e.is_not_found() => state.item_by_access_name(bucket_id, key)?,
                    Err(e) => return Err(e),
                };
                match output {
                    Some(path) => {
                        let content = item.content.as_deref().ok_or_else(|| {
                            ApiError::NotFound(format!("item {} is deleted", item.id))
                        })?;
                        std::fs::write(path, content)
                            .map_err(|e| ApiError::StorageError(e.into()))?;
                        Ok(format!("Wrote {} bytes to {}", content.len(), path.display()))
                    }
                    None => Ok(format_item_text(&item)),
                }
            }
            ItemCommands::Delete { bucket_id, item_id } => {
                state.delete_item(bucket_id, item_id)?;
                Ok(format!("Deleted item {}", item_id))
            }
            ItemCommands::List { bucket_id, format } => {
                let bucket = state.bucket(bucket_id)?;
                let items: Vec<&ItemInfo> = bucket.items().values().collect();
                match format.as_str() {
                    "json" => {
                        let rows: Vec<_> = items
                            .iter()
                            .map(|info| {
                                json!({
                                    "id": info.id,
                                    "access_name": info.access_name(),
                                    "size": info.size,
                                    "last_updated": info.last_updated,
                                    "deleted": info.deleted,
                                })
                            })
                            .collect();
                        Ok(to_json(&json!({ "items": rows, "total": rows.len() })))
                    }
                    _ => {
                        if items.is_empty() {
                            return Ok("No items".to_string());
                        }
                        let lines: Vec<String> = items
                            .iter()
                            .map(|info| {
                                format!(
                                    "{}  {}  {} bytes{}",
                                    info.id,
                                    info.access_name(),
                                    info.size,
                                    if info.deleted { "  (deleted)" } else { "" }
                                )
                            })
                            .collect();
                        Ok(lines.join("\n"))
                    }
                }
            }
        }
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ApiError> {
    std::fs::read(path).map_err(|e| ApiError::StorageError(e.into()))
}

fn file_part(part: Option<&std::ffi::OsStr>) -> String {
    part.map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn to_json(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

fn format_peers_text(peers: &[PeerView]) -> String {
    if peers.is_empty() {
        return "No peers".to_string();
    }
    peers
        .iter()
        .map(|p| format!("{}  {}  {}", p.id, p.address, p.status))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_item_text(item: &Item) -> String {
    let mut out = format!("Item: {}\n", item.id);
    out.push_str(&format!("Access name: {}\n", item.access_name()));
    out.push_str(&format!("Fingerprint: {}\n", hex::encode(item.fingerprint)));
    out.push_str(&format!("Size: {}\n", item.size));
    out.push_str(&format!("Last updated: {}", item.last_updated));
    if item.deleted {
        out.push_str("\nDeleted: yes");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::PeerStatus;

    fn context(data_root: &Path) -> CliContext {
        let mut config = ConfigLoader::default().unwrap();
        config.data_root = data_root.to_path_buf();
        CliContext::from_config(config)
    }

    #[test]
    fn test_cli_parses_serve_overrides() {
        let cli = Cli::parse_from([
            "bucketsync",
            "--log-level",
            "debug",
            "serve",
            "--node-id",
            "node-a",
            "--seed",
            "10.0.0.2:7400",
        ]);
        let Commands::Serve(args) = &cli.command else {
            panic!("expected serve");
        };
        let mut config = ConfigLoader::default().unwrap();
        args.apply(&mut config);
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.seed_peer.as_deref(), Some("10.0.0.2:7400"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[tokio::test]
    async fn test_offline_bucket_and_item_commands() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(&dir.path().join("data"));

        let out = ctx
            .execute(&Commands::Bucket {
                command: BucketCommands::Create {
                    name: "assets".to_string(),
                    path: "/assets".to_string(),
                    id: Some("bucket-assets".to_string()),
                    cache_ttl: 0,
                    gzip: false,
                },
            })
            .await
            .unwrap();
        assert!(out.contains("bucket-assets"));

        let file = dir.path().join("logo.png");
        std::fs::write(&file, b"png bytes").unwrap();
        let out = ctx
            .execute(&Commands::Item {
                command: ItemCommands::Put {
                    bucket_id: "bucket-assets".to_string(),
                    file: file.clone(),
                    name: None,
                    ext: None,
                },
            })
            .await
            .unwrap();
        assert!(out.contains("logo."));

        let listed = ctx
            .execute(&Commands::Item {
                command: ItemCommands::List {
                    bucket_id: "bucket-assets".to_string(),
                    format: "json".to_string(),
                },
            })
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&listed).unwrap();
        assert_eq!(value["total"], 1);
        let access_name = value["items"][0]["access_name"].as_str().unwrap().to_string();
        assert!(access_name.ends_with(".png"));

        let target = dir.path().join("out.png");
        ctx.execute(&Commands::Item {
            command: ItemCommands::Get {
                bucket_id: "bucket-assets".to_string(),
                key: access_name,
                output: Some(target.clone()),
            },
        })
        .await
        .unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"png bytes");
    }

    #[test]
    fn test_format_peers_text() {
        let peers = vec![PeerView {
            id: "node-b".to_string(),
            address: "10.0.0.2:7400".to_string(),
            status: PeerStatus::Down,
        }];
        assert_eq!(format_peers_text(&peers), "node-b  10.0.0.2:7400  down");
        assert_eq!(format_peers_text(&[]), "No peers");
    }
}
