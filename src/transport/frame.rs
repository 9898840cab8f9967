//! Length-prefixed framing for stream transports.
//!
//! Frames are `[4 bytes big-endian u32 length][payload]`.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{RpcError, TransportErrorKind};

/// Maximum frame size (1 MB by default, can be overridden).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Read one frame from the reader.
///
/// Returns the raw bytes of the frame payload, `ConnectionClosed` on a clean
/// EOF before the length prefix.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>, RpcError>
where
    R: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(RpcError::Transport {
                kind: TransportErrorKind::ConnectionClosed,
            });
        }
        Err(e) => return Err(RpcError::Io(e)),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > max_size {
        return Err(RpcError::Transport {
            kind: TransportErrorKind::MessageTooLarge {
                size: len,
                max: max_size,
            },
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;

    Ok(buf)
}

/// Write one frame to the writer.
pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<(), RpcError>
where
    W: AsyncWriteExt + Unpin,
{
    let len = u32::try_from(data.len()).map_err(|_| RpcError::Transport {
        kind: TransportErrorKind::MessageTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        },
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame, failing with `ConnectionTimeout` after `timeout_duration`.
pub async fn read_frame_with_timeout<R>(
    reader: &mut R,
    max_size: usize,
    timeout_duration: Duration,
) -> Result<Vec<u8>, RpcError>
where
    R: AsyncReadExt + Unpin,
{
    timeout(timeout_duration, read_frame(reader, max_size))
        .await
        .map_err(|_| RpcError::Transport {
            kind: TransportErrorKind::ConnectionTimeout,
        })?
}

/// Write one frame, failing with `ConnectionTimeout` after `timeout_duration`.
pub async fn write_frame_with_timeout<W>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> Result<(), RpcError>
where
    W: AsyncWriteExt + Unpin,
{
    timeout(timeout_duration, write_frame(writer, data))
        .await
        .map_err(|_| RpcError::Transport {
            kind: TransportErrorKind::ConnectionTimeout,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_frames_read_back_in_order() {
        let mut wire = Vec::new();
        write_frame(&mut wire, br#"{"method":"add"}"#).await.unwrap();
        write_frame(&mut wire, b"").await.unwrap();
        assert_eq!(&wire[..4], &16u32.to_be_bytes());

        let mut cursor = Cursor::new(wire);
        let first = read_frame(&mut cursor, 16).await.unwrap();
        assert_eq!(first, br#"{"method":"add"}"#);
        assert!(read_frame(&mut cursor, 16).await.unwrap().is_empty());
        assert!(matches!(
            read_frame(&mut cursor, 16).await,
            Err(RpcError::Transport {
                kind: TransportErrorKind::ConnectionClosed
            })
        ));
    }

    #[tokio::test]
    async fn test_length_over_limit_rejected_before_read() {
        let mut wire = 17u32.to_be_bytes().to_vec();
        wire.extend_from_slice(&[b'x'; 17]);

        let result = read_frame(&mut Cursor::new(wire), 16).await;
        assert!(matches!(
            result,
            Err(RpcError::Transport {
                kind: TransportErrorKind::MessageTooLarge { size: 17, max: 16 }
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_io_error() {
        let mut wire = 8u32.to_be_bytes().to_vec();
        wire.extend_from_slice(b"abc");

        let result = read_frame(&mut Cursor::new(wire), DEFAULT_MAX_MESSAGE_SIZE).await;
        assert!(matches!(result, Err(RpcError::Io(_))));
    }
}
