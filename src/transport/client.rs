//! TCP peer client: one connection per call

use super::frame::{read_frame, write_frame};
use super::{Request, Response};
use crate::error::ApiError;
use crate::sync::client::{Connector, PeerClient};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct TcpPeerClient {
    address: String,
    request_timeout: Duration,
}

impl TcpPeerClient {
    pub fn new(address: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            request_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn exchange(&self, request: &Request) -> Result<Response, ApiError> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| ApiError::Transport(format!("connect to {}: {}", self.address, e)))?;
        write_frame(&mut stream, request).await?;
        read_frame(&mut stream).await?.ok_or_else(|| {
            ApiError::Transport(format!("{} closed the connection without replying", self.address))
        })
    }
}

#[async_trait]
impl PeerClient for TcpPeerClient {
    async fn call(&self, request: Request) -> Result<Response, ApiError> {
        let name = request.name();
        debug!(address = %self.address, request = name, "Calling peer");
        timeout(self.request_timeout, self.exchange(&request))
            .await
            .map_err(|_| {
                ApiError::Transport(format!(
                    "{} to {} timed out after {:?}",
                    name, self.address, self.request_timeout
                ))
            })?
    }
}

/// Hands out [`TcpPeerClient`]s sharing one request timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    request_timeout: Duration,
}

impl TcpConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn PeerClient>, ApiError> {
        Ok(Arc::new(TcpPeerClient::new(address, self.request_timeout)))
    }
}
