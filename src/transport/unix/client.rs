//! Unix socket client.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{RpcError, RpcResult, TransportErrorKind};
use crate::transport::frame::{
    read_frame_with_timeout, write_frame_with_timeout, DEFAULT_MAX_MESSAGE_SIZE,
};
use crate::transport::ClientTransport;

/// Client over one persistent Unix socket connection.
///
/// Exchanges are serialized on the connection, so a reply always belongs
/// to the message sent just before it.
pub struct UnixClientTransport {
    socket_path: PathBuf,
    max_message_size: usize,
    timeout: Duration,
    stream: Mutex<Option<UnixStream>>,
}

impl UnixClientTransport {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            timeout: Duration::from_secs(30),
            stream: Mutex::new(None),
        }
    }

    pub fn with_max_message_size(mut self, max_message_size: usize) -> Self {
        self.max_message_size = max_message_size;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ClientTransport for UnixClientTransport {
    async fn open(&self) -> RpcResult<()> {
        let mut guard = self.stream.lock().await;
        if guard.is_none() {
            let stream = UnixStream::connect(&self.socket_path).await?;
            debug!(path = %self.socket_path.display(), "Connected");
            *guard = Some(stream);
        }
        Ok(())
    }

    async fn close(&self) -> RpcResult<()> {
        if let Some(mut stream) = self.stream.lock().await.take() {
            stream.shutdown().await?;
        }
        Ok(())
    }

    async fn send(&self, message: Vec<u8>, expect_reply: bool) -> RpcResult<Option<Vec<u8>>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(RpcError::Transport {
            kind: TransportErrorKind::NotActive,
        })?;

        let result = self.exchange(stream, &message, expect_reply).await;
        if let Err(e) = &result {
            // A late reply would answer the next call; the stream is unusable
            warn!(
                path = %self.socket_path.display(),
                error = %e,
                "Dropping connection after failed exchange"
            );
            *guard = None;
        }
        result
    }
}

impl UnixClientTransport {
    async fn exchange(
        &self,
        stream: &mut UnixStream,
        message: &[u8],
        expect_reply: bool,
    ) -> RpcResult<Option<Vec<u8>>> {
        write_frame_with_timeout(stream, message, self.timeout).await?;
        if !expect_reply {
            return Ok(None);
        }

        let reply = read_frame_with_timeout(stream, self.max_message_size, self.timeout).await?;
        Ok(Some(reply))
    }
}

impl std::fmt::Debug for UnixClientTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixClientTransport")
            .field("socket_path", &self.socket_path)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
