//! In-process cluster for tests
//!
//! [`LocalNetwork`] routes peer calls straight into other [`SyncService`]s living in
//! the same process. Requests and responses still go through bincode so everything
//! that crosses the network in production crosses the codec here too.
//!
//! ```ignore
//! let network = LocalNetwork::new();
//! let node1 = network.spawn_node("node-1");
//! let node2 = network.spawn_node("node-2");
//! node2.register(node1.address()).await?;
//! network.set_reachable(node1.address(), false); // node1 now looks down
//! network.fail_requests(node1.address(), |r| matches!(r, Request::GetItem { .. }));
//! ```

use crate::error::ApiError;
use crate::state::NodeState;
use crate::store::MemoryObjectStore;
use crate::sync::{Connector, PeerClient, PeerInfo, SyncConfig, SyncService};
use crate::transport::{Request, Response};
use crate::tree::DEFAULT_TREE_DEPTH;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

type RequestFilter = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

#[derive(Default)]
struct Routes {
    nodes: HashMap<String, Weak<SyncService>>,
    unreachable: HashSet<String>,
    failing: HashMap<String, RequestFilter>,
}

/// Address book of in-process nodes; doubles as their [`Connector`]
#[derive(Clone, Default)]
pub struct LocalNetwork {
    routes: Arc<RwLock<Routes>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `service` reachable under its advertised address
    pub fn attach(&self, service: &Arc<SyncService>) {
        self.routes
            .write()
            .nodes
            .insert(service.address().to_string(), Arc::downgrade(service));
    }

    /// Create a node with an in-memory store at `local://<id>` and attach it
    pub fn spawn_node(&self, id: &str) -> Arc<SyncService> {
        let store = Arc::new(MemoryObjectStore::new());
        let state = Arc::new(RwLock::new(NodeState::new(store, DEFAULT_TREE_DEPTH)));
        let config = SyncConfig {
            interval: Duration::from_millis(50),
            request_timeout: Duration::from_secs(2),
        };
        let service = Arc::new(SyncService::new(
            PeerInfo::new(id, format!("local://{}", id)),
            state,
            Arc::new(self.clone()),
            config,
        ));
        self.attach(&service);
        service
    }

    /// Cut or restore every call to `address`
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut routes = self.routes.write();
        if reachable {
            routes.unreachable.remove(address);
        } else {
            routes.unreachable.insert(address.to_string());
        }
    }

    /// Fail the requests to `address` that `filter` selects; replaces any earlier filter
    ///
    /// The filter sees every request to `address`, failed or not.
    pub fn fail_requests<F>(&self, address: &str, filter: F)
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.routes
            .write()
            .failing
            .insert(address.to_string(), Arc::new(filter));
    }

    pub fn clear_failures(&self, address: &str) {
        self.routes.write().failing.remove(address);
    }

    fn route(&self, address: &str, request: &Request) -> Result<Arc<SyncService>, ApiError> {
        let (service, filter) = {
            let routes = self.routes.read();
            if routes.unreachable.contains(address) {
                return Err(ApiError::Transport(format!("{} is unreachable", address)));
            }
            let service = routes
                .nodes
                .get(address)
                .and_then(Weak::upgrade)
                .ok_or_else(|| ApiError::Transport(format!("no node at {}", address)))?;
            (service, routes.failing.get(address).cloned())
        };

        if filter.map_or(false, |fails| (*fails)(request)) {
            return Err(ApiError::Transport(format!(
                "{} to {} failed",
                request.name(),
                address
            )));
        }
        Ok(service)
    }
}

#[async_trait]
impl Connector for LocalNetwork {
    async fn connect(&self, address: &str) -> Result<Arc<dyn PeerClient>, ApiError> {
        Ok(Arc::new(LocalClient {
            network: self.clone(),
            address: address.to_string(),
        }))
    }
}

struct LocalClient {
    network: LocalNetwork,
    address: String,
}

#[async_trait]
impl PeerClient for LocalClient {
    async fn call(&self, request: Request) -> Result<Response, ApiError> {
        let service = self.network.route(&self.address, &request)?;
        let request: Request = through_codec(&request)?;
        let response = service.handle(request).await;
        through_codec(&response)
    }
}

fn through_codec<T: Serialize + DeserializeOwned>(value: &T) -> Result<T, ApiError> {
    let bytes = bincode::serialize(value)?;
    bincode::deserialize(&bytes).map_err(|e| ApiError::Transport(e.to_string()))
}
