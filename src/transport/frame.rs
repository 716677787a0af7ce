//! Length-prefixed bincode frames

use crate::error::ApiError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted payload
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Serialize `value` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), ApiError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ApiError::Transport(format!(
            "frame too large: {} > {}",
            payload.len(),
            MAX_FRAME_LEN
        )));
    }

    let len = (payload.len() as u32).to_be_bytes();
    writer.write_all(&len).await.map_err(io_error)?;
    writer.write_all(&payload).await.map_err(io_error)?;
    writer.flush().await.map_err(io_error)?;
    Ok(())
}

/// Read one frame; `None` when the peer closed the stream between frames
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, ApiError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(io_error(e)),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ApiError::Transport(format!(
            "frame too large: {} > {}",
            len, MAX_FRAME_LEN
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(io_error)?;
    let value = bincode::deserialize(&payload)
        .map_err(|e| ApiError::Transport(format!("malformed frame: {}", e)))?;
    Ok(Some(value))
}

fn io_error(err: std::io::Error) -> ApiError {
    ApiError::Transport(err.to_string())
}
