//! Node runtime
//!
//! Wires the object store, node state, sync service and TCP server together from a
//! [`NodeConfig`], and runs them until shutdown.

use crate::config::NodeConfig;
use crate::error::ApiError;
use crate::state::{NodeState, SharedState};
use crate::store::{FsObjectStore, ObjectStore};
use crate::sync::{Connector, SyncService};
use crate::transport::{self, TcpConnector};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

pub struct Node {
    config: NodeConfig,
    service: Arc<SyncService>,
}

impl Node {
    /// Open the data root and rebuild the state from it
    ///
    /// Fails if the data root cannot be created or listed.
    pub fn open(config: NodeConfig) -> Result<Self, ApiError> {
        config.validate()?;
        let store = FsObjectStore::open(&config.data_root)?;
        let connector = TcpConnector::new(config.sync_config().request_timeout);
        Self::with_parts(config, Arc::new(store), Arc::new(connector))
    }

    /// Build a node over an arbitrary store and connector
    pub fn with_parts(
        config: NodeConfig,
        store: Arc<dyn ObjectStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ApiError> {
        config.validate()?;
        let state = NodeState::load(store, config.tree_depth)?;
        let state: SharedState = Arc::new(RwLock::new(state));
        let service = Arc::new(SyncService::new(
            config.peer_info(),
            state,
            connector,
            config.sync_config(),
        ));
        info!(
            node_id = %config.node_id,
            data_root = %config.data_root.display(),
            tree_depth = config.tree_depth,
            "Opened node"
        );
        Ok(Self { config, service })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> &SharedState {
        self.service.state()
    }

    pub fn service(&self) -> &Arc<SyncService> {
        &self.service
    }

    /// Bind the listen address, then run until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<(), ApiError>
    where
        F: Future<Output = ()>,
    {
        let listener = TcpListener::bind(&self.config.listen_address)
            .await
            .map_err(|e| {
                ApiError::Transport(format!("bind {}: {}", self.config.listen_address, e))
            })?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Registration with the seed peer happens after the listener is up so the seed can
    /// call back; a failed registration is logged and the node keeps running alone.
    pub async fn run_with_listener<F>(self, listener: TcpListener, shutdown: F) -> Result<(), ApiError>
    where
        F: Future<Output = ()>,
    {
        let (stop_server, server_stopped) = watch::channel(false);
        let server = tokio::spawn(transport::serve(
            listener,
            Arc::clone(&self.service),
            server_stopped,
        ));

        if let Some(seed) = &self.config.seed_peer {
            match self.service.register(seed).await {
                Ok(added) => info!(seed = %seed, added, "Registered with seed peer"),
                Err(e) => warn!(seed = %seed, error = %e, "Failed to register with seed peer"),
            }
        }

        let monitor = Arc::clone(&self.service).start();
        shutdown.await;
        info!(node_id = %self.config.node_id, "Shutting down");

        monitor.shutdown().await;
        let _ = stop_server.send(true);
        match server.await {
            Ok(result) => result,
            Err(e) => Err(ApiError::Transport(format!("server task failed: {}", e))),
        }
    }
}
