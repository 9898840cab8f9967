//! Per-connection handler.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{RpcError, TransportErrorKind};
use crate::transport::frame::{read_frame_with_timeout, write_frame_with_timeout};
use crate::transport::MessageHandler;

/// Frame limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub(super) struct ConnectionLimits {
    pub max_message_size: usize,
    pub socket_timeout: Duration,
}

/// Serve one client connection until it closes, times out, or the server
/// shuts down.
pub(super) async fn handle_connection(
    stream: UnixStream,
    handler: Arc<dyn MessageHandler>,
    limits: ConnectionLimits,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64, RpcError> {
    let connection_id = Uuid::new_v4();
    let (mut reader, mut writer) = stream.into_split();
    let mut handled = 0u64;

    debug!(connection_id = %connection_id, "Connection opened");

    loop {
        let frame = tokio::select! {
            frame = read_frame_with_timeout(&mut reader, limits.max_message_size, limits.socket_timeout) => frame,
            _ = shutdown.changed() => {
                debug!(connection_id = %connection_id, "Closing connection for shutdown");
                return Ok(handled);
            }
        };

        let message = match frame {
            Ok(message) => message,
            Err(RpcError::Transport {
                kind: TransportErrorKind::ConnectionClosed,
            }) => {
                debug!(connection_id = %connection_id, handled, "Client disconnected");
                return Ok(handled);
            }
            Err(RpcError::Transport {
                kind: TransportErrorKind::ConnectionTimeout,
            }) => {
                warn!(connection_id = %connection_id, "Connection timed out");
                return Ok(handled);
            }
            Err(e) => return Err(e),
        };

        handled += 1;
        debug!(
            connection_id = %connection_id,
            size = message.len(),
            "Received message"
        );

        if let Some(reply) = handler.handle(&message).await {
            write_frame_with_timeout(&mut writer, &reply, limits.socket_timeout).await?;
        }
    }
}
