//! In-process loopback transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::error::{RpcError, RpcResult, TransportErrorKind};

use super::{ClientTransport, MessageHandler, ServerTransport};

type HandlerSlot = Arc<RwLock<Option<Arc<dyn MessageHandler>>>>;

/// Server end of the loopback. Clients made with `connect` call the
/// handler directly.
#[derive(Default)]
pub struct LocalServerTransport {
    handler: HandlerSlot,
}

impl LocalServerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client bound to this server.
    pub fn connect(&self) -> LocalClientTransport {
        LocalClientTransport {
            handler: Arc::clone(&self.handler),
            open: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ServerTransport for LocalServerTransport {
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> RpcResult<()> {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = Some(handler);
        Ok(())
    }

    async fn stop(&self) -> RpcResult<()> {
        *self.handler.write().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Client end of the loopback.
pub struct LocalClientTransport {
    handler: HandlerSlot,
    open: AtomicBool,
}

#[async_trait]
impl ClientTransport for LocalClientTransport {
    async fn open(&self) -> RpcResult<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> RpcResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, message: Vec<u8>, expect_reply: bool) -> RpcResult<Option<Vec<u8>>> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(not_active());
        }
        let handler = self
            .handler
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(not_active)?;

        let reply = handler.handle(&message).await;
        if !expect_reply {
            return Ok(None);
        }
        reply.map(Some).ok_or(RpcError::Transport {
            kind: TransportErrorKind::NoReply,
        })
    }
}

fn not_active() -> RpcError {
    RpcError::Transport {
        kind: TransportErrorKind::NotActive,
    }
}
