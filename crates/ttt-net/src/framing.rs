//! Length-prefixed JSON framing for the match-server TCP stream.
//!
//! ```text
//! +-------------------+---------------------------+
//! | length (4 bytes)  |   UTF-8 JSON document     |
//! | u32 little-endian |   (length bytes)          |
//! +-------------------+---------------------------+
//! ```
//!
//! The length excludes the prefix itself. Frames above
//! [`FrameConfig::max_payload_size`] are refused in both directions.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes. Default: 1 MiB.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: 1_048_576,
        }
    }
}

/// Errors that can occur while reading or writing frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The peer closed the stream before a complete frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame body was not the expected JSON document.
    #[error("invalid frame body: {0}")]
    Json(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn closed_or_io(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read one raw frame. Waits until the whole payload has arrived.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(closed_or_io)?;

    let payload_len = u32::from_le_bytes(len_buf);
    if payload_len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len,
            max: config.max_payload_size,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await.map_err(closed_or_io)?;
    }
    Ok(payload)
}

/// Write one raw frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
    if len > config.max_payload_size {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: config.max_payload_size,
        });
    }

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame and decode its body as JSON.
pub async fn read_json<T, R>(reader: &mut R, config: &FrameConfig) -> Result<T, FrameError>
where
    T: DeserializeOwned,
    R: AsyncReadExt + Unpin,
{
    let payload = read_frame(reader, config).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Encode `message` as JSON and write it as one frame.
pub async fn write_json<T, W>(writer: &mut W, message: &T, config: &FrameConfig) -> Result<(), FrameError>
where
    T: Serialize,
    W: AsyncWriteExt + Unpin,
{
    let payload = serde_json::to_vec(message)?;
    write_frame(writer, &payload, config).await
}
