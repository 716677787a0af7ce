//! Outbound calls to a peer
//!
//! [`PeerClient::call`] is the one method a transport implements; the typed calls are
//! provided on top of it and turn remote errors and mismatched responses into
//! [`ApiError`]s.

use super::peer::{PeerInfo, PeerView};
use crate::bucket::{BucketState, Item};
use crate::error::ApiError;
use crate::transport::{unexpected, Request, Response};
use crate::types::Hash;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reply to a registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Id of the registered-with node
    pub id: String,
    /// Peers it knew before the caller registered
    pub peers: Vec<PeerInfo>,
}

#[async_trait]
pub trait PeerClient: Send + Sync {
    /// Send one request and wait for its response
    async fn call(&self, request: Request) -> Result<Response, ApiError>;

    async fn ping(&self) -> Result<Hash, ApiError> {
        match self.call(Request::Ping).await? {
            Response::Pong { fingerprint } => Ok(fingerprint),
            other => Err(response_error("ping", other)),
        }
    }

    async fn register(&self, me: PeerInfo) -> Result<Registration, ApiError> {
        match self.call(Request::Register(me)).await? {
            Response::Registered { id, peers } => Ok(Registration { id, peers }),
            other => Err(response_error("register", other)),
        }
    }

    async fn get_state(&self) -> Result<BTreeMap<String, BucketState>, ApiError> {
        match self.call(Request::GetState).await? {
            Response::State { buckets } => Ok(buckets),
            other => Err(response_error("get_state", other)),
        }
    }

    async fn get_peers(&self) -> Result<Vec<PeerView>, ApiError> {
        match self.call(Request::GetPeers).await? {
            Response::Peers(peers) => Ok(peers),
            other => Err(response_error("get_peers", other)),
        }
    }

    async fn get_item(&self, bucket_id: &str, item_id: &str) -> Result<Item, ApiError> {
        let request = Request::GetItem {
            bucket_id: bucket_id.to_string(),
            item_id: item_id.to_string(),
        };
        match self.call(request).await? {
            Response::Item(item) => Ok(item),
            other => Err(response_error("get_item", other)),
        }
    }
}

/// Opens client handles to peer addresses
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn PeerClient>, ApiError>;
}

fn response_error(request: &'static str, response: Response) -> ApiError {
    match response {
        Response::Error(err) => err.into(),
        other => unexpected(request, &other),
    }
}
