//! Client side of the call lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::auth::ClientAssistant;
use crate::error::{RpcError, RpcResult, TransportErrorKind};
use crate::protocol::{ProtocolCodec, Request, Response};
use crate::serializer::Serializer;
use crate::transport::ClientTransport;

use super::require_signed_format;

/// Calls remote methods over a transport.
///
/// One client may run many calls at once; ids stay distinct because they
/// come from the shared codec.
pub struct Client {
    codec: ProtocolCodec,
    serializer: Arc<dyn Serializer>,
    transport: Arc<dyn ClientTransport>,
    assistant: Option<ClientAssistant>,
    active: AtomicBool,
}

impl Client {
    pub fn new(
        codec: ProtocolCodec,
        serializer: Arc<dyn Serializer>,
        transport: Arc<dyn ClientTransport>,
    ) -> Self {
        Self {
            codec,
            serializer,
            transport,
            assistant: None,
            active: AtomicBool::new(false),
        }
    }

    /// Sign every request and verify every reply with `assistant`.
    ///
    /// Only a signed wire format carries the authentication fields; any
    /// other format is a configuration error.
    pub fn with_assistant(mut self, assistant: ClientAssistant) -> RpcResult<Self> {
        require_signed_format(&self.codec)?;
        self.assistant = Some(assistant);
        Ok(self)
    }

    pub fn codec(&self) -> &ProtocolCodec {
        &self.codec
    }

    pub async fn open(&self) -> RpcResult<()> {
        self.transport.open().await?;
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn close(&self) -> RpcResult<()> {
        self.active.store(false, Ordering::SeqCst);
        self.transport.close().await
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run one call.
    ///
    /// Returns `None` for a one-way call once the message is handed to the
    /// transport. Error replies come back as `RpcError::Remote`.
    pub async fn call(
        &self,
        method: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        one_way: bool,
    ) -> RpcResult<Option<Value>> {
        if !self.is_active() {
            return Err(RpcError::ClientClosed);
        }

        let mut request = self.codec.create_request(method, args, kwargs, one_way)?;
        if let Some(assistant) = &self.assistant {
            assistant.sign_request(&mut request)?;
        }

        let data = self.codec.encode_request(&request)?;
        let bytes = self.serializer.encode(&data)?;

        debug!(method = %request.method, id = ?request.id, one_way, "Sending request");
        let reply = self.transport.send(bytes, !one_way).await?;
        if one_way {
            return Ok(None);
        }

        let reply = reply.ok_or(RpcError::Transport {
            kind: TransportErrorKind::NoReply,
        })?;
        self.receive(&request, &reply).map(Some)
    }

    /// Call `method` with positional arguments and wait for the result.
    pub async fn request(&self, method: &str, args: Vec<Value>) -> RpcResult<Value> {
        self.call(method, args, Map::new(), false)
            .await?
            .ok_or(RpcError::Transport {
                kind: TransportErrorKind::NoReply,
            })
    }

    /// Call `method` with keyword arguments and wait for the result.
    pub async fn request_kwargs(&self, method: &str, kwargs: Map<String, Value>) -> RpcResult<Value> {
        self.call(method, Vec::new(), kwargs, false)
            .await?
            .ok_or(RpcError::Transport {
                kind: TransportErrorKind::NoReply,
            })
    }

    /// Fire a one-way call.
    pub async fn notify(&self, method: &str, args: Vec<Value>) -> RpcResult<()> {
        self.call(method, args, Map::new(), true).await.map(|_| ())
    }

    fn receive(&self, request: &Request, raw: &[u8]) -> RpcResult<Value> {
        let data = self
            .serializer
            .decode(raw)
            .map_err(|e| RpcError::bad_reply(format!("Undecodable reply: {}", e)))?;
        let response = self.codec.parse_response(&data)?;

        if let Some(assistant) = &self.assistant {
            assistant.check_response(&response)?;
        }

        // An error raised before the server knew the id comes back with a null id
        let id_matches = match (&response, response.id()) {
            (Response::Error(_), None) => true,
            (_, id) => id == request.id.as_ref(),
        };
        if !id_matches {
            warn!(expected = ?request.id, actual = ?response.id(), "Reply id mismatch");
            return Err(RpcError::bad_reply(format!(
                "Reply id {:?} does not match request id {:?}",
                response.id(),
                request.id
            )));
        }

        match response {
            Response::Success(rep) => Ok(rep.result),
            Response::Error(rep) => {
                debug!(code = rep.error.code, message = %rep.error.message, "Error reply");
                Err(rep.to_error())
            }
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("codec", &self.codec)
            .field("active", &self.is_active())
            .field("assistant", &self.assistant)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WireFormat;
    use crate::serializer::JsonSerializer;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Replies with a canned message and records what was sent.
    struct Canned {
        reply: Value,
        sent: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ClientTransport for Canned {
        async fn open(&self) -> RpcResult<()> {
            Ok(())
        }

        async fn close(&self) -> RpcResult<()> {
            Ok(())
        }

        async fn send(&self, message: Vec<u8>, expect_reply: bool) -> RpcResult<Option<Vec<u8>>> {
            self.sent
                .lock()
                .unwrap()
                .push(serde_json::from_slice(&message).unwrap());
            Ok(expect_reply.then(|| serde_json::to_vec(&self.reply).unwrap()))
        }
    }

    fn client(reply: Value) -> (Client, Arc<Canned>) {
        let transport = Arc::new(Canned {
            reply,
            sent: Mutex::new(Vec::new()),
        });
        let client = Client::new(
            ProtocolCodec::new(WireFormat::JsonRpc),
            Arc::new(JsonSerializer),
            transport.clone(),
        );
        (client, transport)
    }

    #[tokio::test]
    async fn test_call_requires_open() {
        let (client, _) = client(json!({"jsonrpc": "2.0", "id": 1, "result": 5}));
        assert!(matches!(
            client.request("add", vec![json!(2), json!(3)]).await,
            Err(RpcError::ClientClosed)
        ));

        client.open().await.unwrap();
        assert_eq!(client.request("add", vec![json!(2), json!(3)]).await.unwrap(), json!(5));

        client.close().await.unwrap();
        assert!(matches!(
            client.request("add", vec![]).await,
            Err(RpcError::ClientClosed)
        ));
    }

    #[tokio::test]
    async fn test_assistant_needs_signed_format() {
        let (unsigned, transport) = client(json!({"jsonrpc": "2.0", "id": 1, "result": 5}));
        assert!(matches!(
            unsigned.with_assistant(ClientAssistant::new("alice", b"k")),
            Err(RpcError::Config { .. })
        ));
        assert!(transport.sent.lock().unwrap().is_empty());

        let signed = Client::new(
            ProtocolCodec::new(WireFormat::SignedJsonRpc),
            Arc::new(JsonSerializer),
            transport,
        );
        assert!(signed
            .with_assistant(ClientAssistant::new("alice", b"k"))
            .is_ok());
    }

    #[tokio::test]
    async fn test_error_reply_raised() {
        let (client, _) = client(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "Method not found"}
        }));
        client.open().await.unwrap();
        match client.request("nope", vec![]).await {
            Err(RpcError::Remote(wire)) => assert_eq!(wire.code, -32601),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_id_mismatch_is_bad_reply() {
        let (client, _) = client(json!({"jsonrpc": "2.0", "id": 99, "result": 5}));
        client.open().await.unwrap();
        assert!(matches!(
            client.request("add", vec![]).await,
            Err(RpcError::BadReply { .. })
        ));
    }

    #[tokio::test]
    async fn test_args_and_kwargs_conflict_fails_before_send() {
        let (client, transport) = client(json!({"jsonrpc": "2.0", "id": 1, "result": 5}));
        client.open().await.unwrap();
        let mut kwargs = Map::new();
        kwargs.insert("b".to_string(), json!(3));
        let err = client
            .call("add", vec![json!(2)], kwargs, false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), Some(crate::error::ErrorKind::InvalidRequest));
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_notify_sends_without_id() {
        let (client, transport) = client(json!(null));
        client.open().await.unwrap();
        client.notify("log", vec![json!("hi")]).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].get("id").is_none());
    }
}
