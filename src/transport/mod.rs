//! Wire protocol between nodes
//!
//! Every exchange is one [`Request`] frame answered by one [`Response`] frame. Frames
//! are a 4-byte big-endian length followed by the bincode payload.

pub mod client;
pub mod frame;
pub mod server;

pub use client::{TcpConnector, TcpPeerClient};
pub use frame::{read_frame, write_frame, MAX_FRAME_LEN};
pub use server::serve;

use crate::bucket::{BucketState, Item};
use crate::error::ApiError;
use crate::sync::peer::{PeerInfo, PeerView};
use crate::types::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inbound calls served by every node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Ping,
    Register(PeerInfo),
    GetState,
    GetPeers,
    GetItem { bucket_id: String, item_id: String },
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Register(_) => "register",
            Request::GetState => "get_state",
            Request::GetPeers => "get_peers",
            Request::GetItem { .. } => "get_item",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Pong { fingerprint: Hash },
    Registered { id: String, peers: Vec<PeerInfo> },
    State { buckets: BTreeMap<String, BucketState> },
    Peers(Vec<PeerView>),
    Item(Item),
    Error(RemoteError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    NotFound,
    Conflict,
    Other,
}

/// An error raised by the remote handler, carried back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl From<&ApiError> for RemoteError {
    fn from(err: &ApiError) -> Self {
        let kind = match err {
            ApiError::NotFound(_) => RemoteErrorKind::NotFound,
            ApiError::Conflict(_) => RemoteErrorKind::Conflict,
            _ => RemoteErrorKind::Other,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        match err.kind {
            RemoteErrorKind::NotFound => ApiError::NotFound(err.message),
            RemoteErrorKind::Conflict => ApiError::Conflict(err.message),
            RemoteErrorKind::Other => ApiError::Transport(format!("remote error: {}", err.message)),
        }
    }
}

/// Error for a response variant that does not answer the request
pub(crate) fn unexpected(request: &'static str, response: &Response) -> ApiError {
    ApiError::Transport(format!(
        "unexpected response to {}: {:?}",
        request,
        std::mem::discriminant(response)
    ))
}
