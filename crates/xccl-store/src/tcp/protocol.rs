//! TCP store wire protocol
//!
//! Every message is a 4-byte big-endian length followed by a
//! bincode-encoded `Request` or `Response`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use xccl_core::{Error, Result};

/// Client request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Set { key: String, value: Vec<u8> },
    /// Answered once the key exists
    Get { key: String },
    Check { keys: Vec<String> },
    Add { key: String, delta: i64 },
    DeleteKey { key: String },
    Ping,
}

/// Server response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Value(Vec<u8>),
    Present(bool),
    Counter(i64),
    Deleted(bool),
    Pong,
    Error(String),
}

/// Encode and write one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_message_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message).map_err(|e| Error::Serialization(e.to_string()))?;
    if payload.len() > max_message_size {
        return Err(Error::Store {
            message: format!(
                "frame of {} bytes exceeds limit of {} bytes",
                payload.len(),
                max_message_size
            ),
        });
    }

    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read and decode one frame
///
/// Returns `Ok(None)` when the peer closed the connection between frames.
pub async fn read_frame<R, T>(reader: &mut R, max_message_size: usize) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if len > max_message_size {
        return Err(Error::Store {
            message: format!(
                "incoming frame of {} bytes exceeds limit of {} bytes",
                len, max_message_size
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let message = bincode::deserialize(&payload).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(Some(message))
}
