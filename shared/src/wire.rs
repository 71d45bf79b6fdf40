//! Length-prefixed bincode framing
//!
//! Each frame is a 4-byte big-endian length followed by the bincode payload.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SharedError, SharedResult};

/// Largest payload accepted in either direction
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Serialize `message` and write it as one frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(message).map_err(|e| SharedError::SerializationError {
        message: e.to_string(),
    })?;

    if data.len() > MAX_FRAME_LEN {
        return Err(SharedError::FrameTooLarge {
            len: data.len(),
            max: MAX_FRAME_LEN,
        });
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `Ok(None)` when the peer closed cleanly between frames
pub async fn read_frame<R, T>(reader: &mut R) -> SharedResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(SharedError::FrameTooLarge { len, max: MAX_FRAME_LEN });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    let message = bincode::deserialize(&data).map_err(|e| SharedError::DeserializationError {
        message: e.to_string(),
    })?;
    Ok(Some(message))
}
