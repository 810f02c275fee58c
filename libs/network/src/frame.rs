//! Length-prefixed framing
//!
//! Each frame is a `u32` big-endian length followed by that many bytes.

use crate::error::{Result, TransportError};
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix
pub const FRAME_HEADER_SIZE: usize = 4;

/// Write one frame and flush
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len())
        .map_err(|_| TransportError::frame_too_large(data.len(), u32::MAX as usize))?;

    let mut buffer = BytesMut::with_capacity(FRAME_HEADER_SIZE + data.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(data);

    // Single write so a frame is never interleaved with another
    writer
        .write_all(&buffer)
        .await
        .map_err(|e| TransportError::io("Failed to write frame", e))?;
    writer
        .flush()
        .await
        .map_err(|e| TransportError::io("Failed to flush stream", e))?;
    Ok(())
}

/// Read one frame, rejecting lengths above `max_frame_bytes`
///
/// A clean end of stream before the length prefix is [`TransportError::Closed`].
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> Result<Bytes>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; FRAME_HEADER_SIZE];
    if let Err(e) = reader.read_exact(&mut len_bytes).await {
        return Err(if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransportError::Closed
        } else {
            TransportError::io("Failed to read frame length", e)
        });
    }

    let frame_len = u32::from_be_bytes(len_bytes) as usize;
    if frame_len > max_frame_bytes {
        return Err(TransportError::frame_too_large(frame_len, max_frame_bytes));
    }

    let mut buffer = BytesMut::zeroed(frame_len);
    reader
        .read_exact(&mut buffer)
        .await
        .map_err(|e| TransportError::io("Failed to read frame body", e))?;

    Ok(buffer.freeze())
}
