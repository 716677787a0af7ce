//! TCP server: accepts connections and serves each on its own task

use super::frame::{read_frame, write_frame};
use super::Request;
use crate::error::ApiError;
use crate::sync::SyncService;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Accept connections until `shutdown` flips to `true` or its sender is dropped
pub async fn serve(
    listener: TcpListener,
    service: Arc<SyncService>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ApiError> {
    let local = listener
        .local_addr()
        .map_err(|e| ApiError::Transport(e.to_string()))?;
    info!(address = %local, node_id = %service.node_id(), "Serving peer requests");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        let service = Arc::clone(&service);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, remote, service).await {
                                debug!(remote = %remote, error = %e, "Connection closed with error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!(address = %local, "Stopped serving peer requests");
    Ok(())
}

async fn serve_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    service: Arc<SyncService>,
) -> Result<(), ApiError> {
    while let Some(request) = read_frame::<_, Request>(&mut stream).await? {
        debug!(remote = %remote, request = request.name(), "Handling request");
        let response = service.handle(request).await;
        write_frame(&mut stream, &response).await?;
    }
    Ok(())
}
