//! Server side of the call lifecycle.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::auth::ServerAssistant;
use crate::dispatch::Dispatcher;
use crate::error::{ProtocolErrorKind, RpcError, RpcResult};
use crate::protocol::{ProtocolCodec, Request, Response};
use crate::serializer::Serializer;
use crate::transport::{MessageHandler, ServerTransport};

/// Turns raw request bytes into raw reply bytes.
///
/// Parse and authentication failures are answered directly with an error
/// reply; only verified requests reach the dispatcher.
pub struct Server {
    codec: ProtocolCodec,
    serializer: Arc<dyn Serializer>,
    dispatcher: Arc<dyn Dispatcher>,
    assistant: Option<Arc<ServerAssistant>>,
}

impl Server {
    pub fn new(
        codec: ProtocolCodec,
        serializer: Arc<dyn Serializer>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            codec,
            serializer,
            dispatcher,
            assistant: None,
        }
    }

    /// Verify every request and sign every reply with `assistant`.
    ///
    /// Fails with `Config` unless the codec uses a signed wire format.
    pub fn with_assistant(mut self, assistant: Arc<ServerAssistant>) -> RpcResult<Self> {
        super::require_signed_format(&self.codec)?;
        self.assistant = Some(assistant);
        Ok(self)
    }

    pub fn codec(&self) -> &ProtocolCodec {
        &self.codec
    }

    /// Start serving on `transport`.
    pub async fn start(self: &Arc<Self>, transport: &dyn ServerTransport) -> RpcResult<()> {
        let handler: Arc<dyn MessageHandler> = Arc::clone(self) as Arc<dyn MessageHandler>;
        transport.start(handler).await
    }

    /// Stop serving on `transport`.
    pub async fn stop(&self, transport: &dyn ServerTransport) -> RpcResult<()> {
        transport.stop().await
    }

    /// Handle one raw message. Returns the reply bytes, or `None` for a
    /// one-way request.
    pub async fn handle_message(&self, raw: &[u8]) -> Option<Vec<u8>> {
        let (request, response) = match self.parse(raw) {
            Ok(request) => {
                let response = self.execute(&request).await;
                (Some(request), response)
            }
            Err(e) => {
                warn!(error = %e, "Rejected unparseable request");
                (None, self.codec.create_error_response(&e, None).into())
            }
        };

        if request.as_ref().is_some_and(Request::is_one_way) {
            debug!("One-way request, no reply sent");
            return None;
        }

        match self.finish(response) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(error = %e, "Failed to build reply");
                None
            }
        }
    }

    fn parse(&self, raw: &[u8]) -> RpcResult<Request> {
        let data = self.serializer.decode(raw).map_err(|e| RpcError::Protocol {
            kind: ProtocolErrorKind::Parse {
                message: e.to_string(),
            },
        })?;
        self.codec.parse_request(&data)
    }

    /// Authenticate and dispatch a parsed request.
    async fn execute(&self, request: &Request) -> Response {
        if let Some(assistant) = &self.assistant {
            if let Err(e) = assistant.check_request(request) {
                return self.codec.create_error_response(&e, Some(request)).into();
            }
        }

        match self.dispatcher.dispatch(request).await {
            Ok(result) => self.codec.create_response(request, result).into(),
            Err(e) => {
                log_dispatch_error(request, &e);
                self.codec.create_error_response(&e, Some(request)).into()
            }
        }
    }

    /// Sign, encode and serialize a reply.
    fn finish(&self, mut response: Response) -> RpcResult<Vec<u8>> {
        if let Some(assistant) = &self.assistant {
            assistant.sign_response(&mut response)?;
        }
        let data: Value = self.codec.encode_response(&response)?;
        self.serializer.encode(&data)
    }
}

fn log_dispatch_error(request: &Request, e: &RpcError) {
    if e.kind().is_some() {
        warn!(method = %request.method, id = ?request.id, error = %e, "Method failed");
    } else {
        error!(method = %request.method, id = ?request.id, error = %e, "Method failed with internal error");
    }
}

#[async_trait]
impl MessageHandler for Server {
    async fn handle(&self, message: &[u8]) -> Option<Vec<u8>> {
        self.handle_message(message).await
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("codec", &self.codec)
            .field("authenticated", &self.assistant.is_some())
            .finish_non_exhaustive()
    }
}
