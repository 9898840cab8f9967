//! Byte transports between client and server.
//!
//! The RPC core only needs to hand bytes over and, unless the call is
//! one-way, get bytes back. Two transports ship with the crate: an
//! in-process loopback and a Unix domain socket with length-prefixed frames.

mod frame;
mod local;
mod unix;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RpcResult;

pub use frame::{
    read_frame, read_frame_with_timeout, write_frame, write_frame_with_timeout,
    DEFAULT_MAX_MESSAGE_SIZE,
};
pub use local::{LocalClientTransport, LocalServerTransport};
pub use unix::{ConnectionStats, UnixClientTransport, UnixServerConfig, UnixServerTransport};

/// Turns one incoming message into an optional reply.
///
/// `None` means no reply is sent (one-way requests).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &[u8]) -> Option<Vec<u8>>;
}

/// Server side of a transport.
#[async_trait]
pub trait ServerTransport: Send + Sync {
    /// Begin delivering messages to `handler`. Returns once serving has started.
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> RpcResult<()>;

    /// Stop accepting messages and wait for in-flight work to finish.
    async fn stop(&self) -> RpcResult<()>;
}

/// Client side of a transport.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    async fn open(&self) -> RpcResult<()>;

    async fn close(&self) -> RpcResult<()>;

    /// Send `message`; wait for the reply only when `expect_reply` is set.
    async fn send(&self, message: Vec<u8>, expect_reply: bool) -> RpcResult<Option<Vec<u8>>>;
}
