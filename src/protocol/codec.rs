//! Protocol codec: builds, encodes and parses messages for one wire format.
//!
//! The codec works on structured data (`serde_json::Value` objects). Turning
//! that into bytes is the serializer's job.

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{AuthErrorKind, RpcError, RpcResult, WireError};

use super::format::WireFormat;
use super::request::{check_signing_field, CallId, Params, Request, Seal};
use super::response::{ErrorResponse, Response, SuccessResponse};

/// Builds and parses requests/responses for a specific wire format.
///
/// Owns the call id counter; share one codec between concurrent calls and
/// every non one-way request still gets a distinct id.
#[derive(Debug)]
pub struct ProtocolCodec {
    format: WireFormat,
    /// Last id handed out.
    counter: AtomicI64,
}

impl ProtocolCodec {
    /// Create a codec whose first id will be 1.
    pub fn new(format: WireFormat) -> Self {
        Self::with_counter(format, 0)
    }

    /// Create a codec starting from `counter`; the first id is `counter + 1`.
    pub fn with_counter(format: WireFormat, counter: i64) -> Self {
        Self {
            format,
            counter: AtomicI64::new(counter),
        }
    }

    pub fn format(&self) -> WireFormat {
        self.format
    }

    /// Hand out the next id. Fails once the counter reaches `i64::MAX`
    /// instead of wrapping onto ids already used.
    fn next_id(&self) -> RpcResult<CallId> {
        self.counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
            .map(|last| CallId::Int(last + 1))
            .map_err(|_| RpcError::invalid_request("Call id counter exhausted"))
    }

    /// Create a request. One-way requests get no id.
    pub fn create_request(
        &self,
        method: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        one_way: bool,
    ) -> RpcResult<Request> {
        let params = Params::from_parts(args, kwargs)?;
        let id = if one_way { None } else { Some(self.next_id()?) };
        Ok(Request::new(method, id, params))
    }

    /// Create the success reply for `request`.
    pub fn create_response(&self, request: &Request, result: Value) -> SuccessResponse {
        SuccessResponse {
            id: request.id.clone(),
            result,
            client: request.client.clone(),
            seal: None,
        }
    }

    /// Map `error` onto the taxonomy and bind it to `request` if known.
    pub fn create_error_response(&self, error: &RpcError, request: Option<&Request>) -> ErrorResponse {
        ErrorResponse {
            id: request.and_then(|r| r.id.clone()),
            error: error.wire_error(),
            client: request.and_then(|r| r.client.clone()),
            seal: None,
        }
    }

    /// Encode a request to its structured wire form.
    pub fn encode_request(&self, request: &Request) -> RpcResult<Value> {
        let mut obj = self.envelope();
        obj.insert("method".to_string(), Value::String(request.method.clone()));
        if let Some(id) = &request.id {
            obj.insert("id".to_string(), id.to_value());
        }

        match (self.format, &request.params) {
            (WireFormat::PyRpc, Params::Args(args)) if !args.is_empty() => {
                obj.insert("args".to_string(), Value::Array(args.clone()));
            }
            (WireFormat::PyRpc, Params::Kwargs(kwargs)) if !kwargs.is_empty() => {
                obj.insert("kwargs".to_string(), Value::Object(kwargs.clone()));
            }
            (WireFormat::PyRpc, _) => {}
            (_, params) => {
                if let Some(params) = params.to_value() {
                    obj.insert("params".to_string(), params);
                }
            }
        }

        if self.format.is_signed() {
            let client = request.client.as_ref().ok_or_else(|| missing_field("client"))?;
            let seal = request.seal.as_ref().ok_or_else(|| missing_field("signature"))?;
            obj.insert("client".to_string(), Value::String(client.clone()));
            insert_seal(&mut obj, seal);
        }

        Ok(Value::Object(obj))
    }

    /// Encode a reply to its structured wire form.
    pub fn encode_response(&self, response: &Response) -> RpcResult<Value> {
        let mut obj = self.envelope();
        obj.insert(
            "id".to_string(),
            response.id().map(CallId::to_value).unwrap_or(Value::Null),
        );

        match response {
            Response::Success(rep) => {
                obj.insert("result".to_string(), rep.result.clone());
            }
            Response::Error(rep) => {
                obj.insert("error".to_string(), rep.error.to_value());
            }
        }

        if self.format.is_signed() {
            let seal = response.seal().ok_or_else(|| missing_field("signature"))?;
            obj.insert(
                "client".to_string(),
                response
                    .client()
                    .map(|c| Value::String(c.to_string()))
                    .unwrap_or(Value::Null),
            );
            insert_seal(&mut obj, seal);
        }

        Ok(Value::Object(obj))
    }

    /// Parse and validate an incoming request.
    pub fn parse_request(&self, data: &Value) -> RpcResult<Request> {
        let obj = data
            .as_object()
            .ok_or_else(|| RpcError::invalid_request("Request must be an object"))?;

        if let Some(key) = unknown_key(obj, self.format.request_keys()) {
            return Err(RpcError::invalid_request(format!("Key not allowed: {}", key)));
        }

        if !self.has_version(obj) {
            return Err(RpcError::invalid_request(format!(
                "Wrong or missing {} version",
                self.format.version_key()
            )));
        }

        let method = match obj.get("method") {
            Some(Value::String(method)) => method.clone(),
            _ => return Err(RpcError::invalid_request("method must be str")),
        };

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(value) => Some(CallId::Int(
                value
                    .as_i64()
                    .ok_or_else(|| RpcError::invalid_request("id must be int"))?,
            )),
        };

        let params = match self.format {
            WireFormat::PyRpc => parse_split_params(obj)?,
            _ => parse_params(obj.get("params"))?,
        };

        let mut request = Request::new(method, id, params);

        if self.format.is_signed() {
            let client = auth_str(obj, "client")?;
            let nonce = auth_str(obj, "nonce")?;
            let signed_fields = [
                ("method", &request.method),
                ("client", &client),
                ("nonce", &nonce),
            ];
            for (field, value) in signed_fields {
                check_signing_field(field, value).map_err(RpcError::invalid_request)?;
            }
            request.client = Some(client);
            request.seal = Some(Seal {
                nonce,
                timestamp: obj
                    .get("timestamp")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| missing_field("timestamp"))?,
                signature: auth_str(obj, "signature")?,
            });
        }

        debug!(
            method = %request.method,
            id = ?request.id,
            format = %self.format,
            "Parsed request"
        );

        Ok(request)
    }

    /// Parse and validate a reply. Malformed replies fail with `BadReply`.
    pub fn parse_response(&self, data: &Value) -> RpcResult<Response> {
        let obj = data
            .as_object()
            .ok_or_else(|| RpcError::bad_reply("Reply must be an object"))?;

        if let Some(key) = unknown_key(obj, self.format.reply_keys()) {
            return Err(RpcError::bad_reply(format!("Key not allowed: {}", key)));
        }

        if !self.has_version(obj) {
            return Err(RpcError::bad_reply(format!(
                "Wrong or missing {} version",
                self.format.version_key()
            )));
        }

        let id = match obj.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(CallId::Str(id.clone())),
            Some(value) => Some(CallId::Int(value.as_i64().ok_or_else(|| {
                RpcError::bad_reply("id must be int or str or None")
            })?)),
        };

        let (client, seal) = if self.format.is_signed() {
            let client = match obj.get("client") {
                Some(Value::Null) => None,
                Some(Value::String(client)) => Some(client.clone()),
                _ => return Err(RpcError::bad_reply("Missing client in response")),
            };
            let nonce = reply_str(obj, "nonce")?;
            check_signing_field("nonce", &nonce).map_err(RpcError::bad_reply)?;
            if let Some(client) = &client {
                check_signing_field("client", client).map_err(RpcError::bad_reply)?;
            }
            if let Some(CallId::Str(id)) = &id {
                check_signing_field("id", id).map_err(RpcError::bad_reply)?;
            }
            let seal = Seal {
                nonce,
                timestamp: obj
                    .get("timestamp")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| RpcError::bad_reply("Missing timestamp in response"))?,
                signature: reply_str(obj, "signature")?,
            };
            (client, Some(seal))
        } else {
            (None, None)
        };

        match (obj.get("result"), obj.get("error")) {
            (Some(result), None) => Ok(Response::Success(SuccessResponse {
                id,
                result: result.clone(),
                client,
                seal,
            })),
            (None, Some(error)) => {
                let error = error
                    .as_object()
                    .ok_or_else(|| RpcError::bad_reply("error must be an object"))?;
                let code = error
                    .get("code")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| RpcError::bad_reply("error.code must be int"))?;
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::bad_reply("error.message must be str"))?;
                let mut wire = WireError::new(code, message);
                wire.data = error.get("data").cloned();

                Ok(Response::Error(ErrorResponse {
                    id,
                    error: wire,
                    client,
                    seal,
                }))
            }
            _ => Err(RpcError::bad_reply(
                "Reply must contain exactly one of result and error",
            )),
        }
    }

    /// New object holding only the version tag.
    fn envelope(&self) -> Map<String, Value> {
        let mut obj = Map::new();
        obj.insert(
            self.format.version_key().to_string(),
            Value::String(self.format.version().to_string()),
        );
        obj
    }

    fn has_version(&self, obj: &Map<String, Value>) -> bool {
        obj.get(self.format.version_key()).and_then(Value::as_str) == Some(self.format.version())
    }
}

fn unknown_key<'a>(obj: &'a Map<String, Value>, allowed: &[&str]) -> Option<&'a str> {
    obj.keys()
        .map(String::as_str)
        .find(|key| !allowed.contains(key))
}

fn parse_params(params: Option<&Value>) -> RpcResult<Params> {
    match params {
        None => Ok(Params::None),
        Some(Value::Array(args)) => Ok(Params::Args(args.clone())),
        Some(Value::Object(kwargs)) => Ok(Params::Kwargs(kwargs.clone())),
        Some(_) => Err(RpcError::invalid_params("params must be list or dict")),
    }
}

fn parse_split_params(obj: &Map<String, Value>) -> RpcResult<Params> {
    let args = match obj.get("args") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(args)) => args.clone(),
        Some(_) => return Err(RpcError::invalid_params("args must be list")),
    };
    let kwargs = match obj.get("kwargs") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(kwargs)) => kwargs.clone(),
        Some(_) => return Err(RpcError::invalid_params("kwargs must be dict")),
    };
    Params::from_parts(args, kwargs)
}

fn insert_seal(obj: &mut Map<String, Value>, seal: &Seal) {
    obj.insert("nonce".to_string(), Value::String(seal.nonce.clone()));
    obj.insert("timestamp".to_string(), Value::from(seal.timestamp));
    obj.insert("signature".to_string(), Value::String(seal.signature.clone()));
}

fn missing_field(field: &'static str) -> RpcError {
    RpcError::Auth {
        kind: AuthErrorKind::MissingField { field },
    }
}

fn auth_str(obj: &Map<String, Value>, field: &'static str) -> RpcResult<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing_field(field))
}

fn reply_str(obj: &Map<String, Value>, field: &str) -> RpcResult<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::bad_reply(format!("Missing {} in response", field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ProtocolErrorKind};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn kwargs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn assert_kind(result: RpcResult<Request>, expected: ErrorKind) {
        let err = result.expect_err("request should be rejected");
        assert_eq!(err.kind(), Some(expected), "unexpected error: {}", err);
    }

    #[test]
    fn test_request_round_trip_all_formats() {
        for format in [WireFormat::JsonRpc, WireFormat::PyRpc] {
            let codec = ProtocolCodec::new(format);
            for (args, kw) in [
                (vec![json!(2), json!(3)], Map::new()),
                (vec![], kwargs(&[("a", json!(1)), ("b", json!([true]))])),
                (vec![], Map::new()),
            ] {
                let request = codec.create_request("add", args, kw, false).unwrap();
                // Through bytes, as a transport would carry it
                let bytes = serde_json::to_vec(&codec.encode_request(&request).unwrap()).unwrap();
                let data: Value = serde_json::from_slice(&bytes).unwrap();
                let parsed = codec.parse_request(&data).unwrap();
                assert_eq!(parsed, request, "format {}", format);
            }
        }
    }

    #[test]
    fn test_signed_request_round_trip() {
        let codec = ProtocolCodec::new(WireFormat::SignedJsonRpc);
        let mut request = codec
            .create_request("add", vec![json!(2), json!(3)], Map::new(), false)
            .unwrap();
        request.client = Some("alice".to_string());
        request.seal = Some(Seal {
            nonce: "00ff".to_string(),
            timestamp: 1_700_000_000,
            signature: "c2ln".to_string(),
        });

        let data = codec.encode_request(&request).unwrap();
        assert_eq!(data["client"], "alice");
        assert_eq!(data["jsonrpc"], "2.0");
        assert_eq!(codec.parse_request(&data).unwrap(), request);
    }

    #[test]
    fn test_signed_request_requires_seal_to_encode() {
        let codec = ProtocolCodec::new(WireFormat::SignedJsonRpc);
        let request = codec.create_request("ping", vec![], Map::new(), false).unwrap();
        assert!(matches!(
            codec.encode_request(&request),
            Err(RpcError::Auth {
                kind: AuthErrorKind::MissingField { field: "client" }
            })
        ));
    }

    #[test]
    fn test_one_way_request_has_no_id() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        let request = codec.create_request("notify", vec![json!(1)], Map::new(), true).unwrap();
        assert!(request.id.is_none());
        assert!(request.is_one_way());

        let data = codec.encode_request(&request).unwrap();
        assert!(data.get("id").is_none());

        // One-way requests do not consume ids
        let next = codec.create_request("call", vec![], Map::new(), false).unwrap();
        assert_eq!(next.id, Some(CallId::Int(1)));
    }

    #[test]
    fn test_args_and_kwargs_exclusive() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        let result = codec.create_request("add", vec![json!(1)], kwargs(&[("b", json!(2))]), false);
        assert_kind(result, ErrorKind::InvalidRequest);

        // A failed create does not consume an id
        let request = codec.create_request("add", vec![], Map::new(), false).unwrap();
        assert_eq!(request.id, Some(CallId::Int(1)));
    }

    #[test]
    fn test_ids_strictly_increase_from_initial_counter() {
        let codec = ProtocolCodec::with_counter(WireFormat::JsonRpc, 41);
        let ids: Vec<CallId> = (0..5)
            .map(|_| codec.create_request("m", vec![], Map::new(), false).unwrap().id.unwrap())
            .collect();
        assert_eq!(
            ids,
            (42..47).map(CallId::Int).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_concurrent_ids_are_distinct() {
        let codec = Arc::new(ProtocolCodec::new(WireFormat::JsonRpc));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let codec = Arc::clone(&codec);
                std::thread::spawn(move || {
                    (0..250)
                        .map(|_| codec.create_request("m", vec![], Map::new(), false).unwrap().id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id.unwrap()), "duplicate id");
            }
        }
        assert_eq!(seen.len(), 2000);
    }

    #[test]
    fn test_parse_request_rejects_unknown_key() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        let data = json!({"jsonrpc": "2.0", "method": "m", "id": 1, "extra": true});
        assert_kind(codec.parse_request(&data), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_parse_request_rejects_bad_version() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        assert_kind(
            codec.parse_request(&json!({"jsonrpc": "1.0", "method": "m"})),
            ErrorKind::InvalidRequest,
        );
        assert_kind(
            codec.parse_request(&json!({"method": "m"})),
            ErrorKind::InvalidRequest,
        );
    }

    #[test]
    fn test_parse_request_shape_checks() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        assert_kind(
            codec.parse_request(&json!({"jsonrpc": "2.0", "method": 5})),
            ErrorKind::InvalidRequest,
        );
        assert_kind(
            codec.parse_request(&json!({"jsonrpc": "2.0", "method": "m", "id": "abc"})),
            ErrorKind::InvalidRequest,
        );
        assert_kind(
            codec.parse_request(&json!({"jsonrpc": "2.0", "method": "m", "params": 3})),
            ErrorKind::InvalidParams,
        );
        assert_kind(codec.parse_request(&json!([1, 2])), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_pyrpc_split_params() {
        let codec = ProtocolCodec::new(WireFormat::PyRpc);
        let request = codec
            .parse_request(&json!({"pyrpc": "1.0", "method": "m", "id": 1, "kwargs": {"x": 1}}))
            .unwrap();
        assert_eq!(request.params, Params::Kwargs(kwargs(&[("x", json!(1))])));

        assert_kind(
            codec.parse_request(&json!({"pyrpc": "1.0", "method": "m", "args": [1], "kwargs": {"x": 1}})),
            ErrorKind::InvalidRequest,
        );
        assert_kind(
            codec.parse_request(&json!({"pyrpc": "1.0", "method": "m", "args": {"x": 1}})),
            ErrorKind::InvalidParams,
        );
    }

    #[test]
    fn test_signed_request_missing_auth_field() {
        let codec = ProtocolCodec::new(WireFormat::SignedJsonRpc);
        let data = json!({
            "jsonrpc": "2.0",
            "method": "m",
            "client": "alice",
            "nonce": "n",
            "timestamp": 1
        });
        assert_kind(codec.parse_request(&data), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_signed_request_rejects_separator_in_fields() {
        let codec = ProtocolCodec::new(WireFormat::SignedJsonRpc);
        let base = json!({
            "jsonrpc": "2.0",
            "method": "add",
            "id": 1,
            "params": [1, 2],
            "client": "alice",
            "nonce": "00ff",
            "timestamp": 1_700_000_000,
            "signature": "c2ln"
        });
        codec.parse_request(&base).unwrap();

        for (field, value) in [("method", "add:1"), ("client", "al:ice"), ("nonce", "00:ff")] {
            let mut data = base.clone();
            data[field] = json!(value);
            assert_kind(codec.parse_request(&data), ErrorKind::InvalidRequest);
        }

        // The trailing params may contain the separator
        let mut data = base.clone();
        data["params"] = json!(["a:b"]);
        codec.parse_request(&data).unwrap();
    }

    #[test]
    fn test_signed_response_rejects_separator_in_fields() {
        let codec = ProtocolCodec::new(WireFormat::SignedJsonRpc);
        let base = json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "result": "x:y",
            "client": "alice",
            "nonce": "00ff",
            "timestamp": 1_700_000_000,
            "signature": "c2ln"
        });
        codec.parse_response(&base).unwrap();

        for (field, value) in [("id", "call:1"), ("client", "al:ice"), ("nonce", "00:ff")] {
            let mut data = base.clone();
            data[field] = json!(value);
            assert!(
                matches!(codec.parse_response(&data), Err(RpcError::BadReply { .. })),
                "accepted {}",
                data
            );
        }
    }

    #[test]
    fn test_id_counter_does_not_wrap() {
        let codec = ProtocolCodec::with_counter(WireFormat::JsonRpc, i64::MAX - 1);
        let last = codec.create_request("m", vec![], Map::new(), false).unwrap();
        assert_eq!(last.id, Some(CallId::Int(i64::MAX)));

        for _ in 0..2 {
            assert_kind(
                codec.create_request("m", vec![], Map::new(), false),
                ErrorKind::InvalidRequest,
            );
        }

        // One-way requests need no id and still work
        assert!(codec.create_request("m", vec![], Map::new(), true).is_ok());
    }

    #[test]
    fn test_parse_response_success_and_error() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        let ok = codec
            .parse_response(&json!({"jsonrpc": "2.0", "id": 1, "result": 5}))
            .unwrap();
        assert_eq!(ok.id(), Some(&CallId::Int(1)));
        assert!(!ok.is_error());

        let err = codec
            .parse_response(&json!({
                "jsonrpc": "2.0",
                "id": null,
                "error": {"code": -32700, "message": "Parse error", "data": "x"}
            }))
            .unwrap();
        match err {
            Response::Error(rep) => {
                assert!(rep.id.is_none());
                assert_eq!(rep.error.kind(), Some(ErrorKind::ParseError));
                assert_eq!(rep.error.data, Some(json!("x")));
            }
            other => panic!("expected error reply, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_response_rejects_malformed() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        for data in [
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "result": 1, "error": {"code": 1, "message": "m"}}),
            json!({"jsonrpc": "2.0", "id": 1, "result": 1, "smuggled": 1}),
            json!({"jsonrpc": "3.0", "id": 1, "result": 1}),
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": "x", "message": "m"}}),
            json!({"jsonrpc": "2.0", "id": 1, "error": {"code": 1, "message": 2}}),
            json!({"jsonrpc": "2.0", "id": [1], "result": 1}),
        ] {
            assert!(
                matches!(codec.parse_response(&data), Err(RpcError::BadReply { .. })),
                "accepted {}",
                data
            );
        }
    }

    #[test]
    fn test_signed_response_round_trip_with_null_client() {
        let codec = ProtocolCodec::new(WireFormat::SignedJsonRpc);
        let mut response: Response = codec
            .create_error_response(
                &RpcError::Protocol {
                    kind: ProtocolErrorKind::Parse {
                        message: "bad bytes".to_string(),
                    },
                },
                None,
            )
            .into();
        response.set_seal(Seal {
            nonce: "n".to_string(),
            timestamp: 10,
            signature: String::new(),
        });

        let data = codec.encode_response(&response).unwrap();
        assert_eq!(data["client"], Value::Null);
        assert_eq!(data["id"], Value::Null);
        assert_eq!(codec.parse_response(&data).unwrap(), response);
    }

    #[test]
    fn test_create_error_response_binds_request() {
        let codec = ProtocolCodec::new(WireFormat::JsonRpc);
        let request = codec.create_request("m", vec![], Map::new(), false).unwrap();
        let raised = WireError::server_error(-32010, "Resource busy").unwrap();
        let rep = codec.create_error_response(&RpcError::Remote(raised.clone()), Some(&request));
        assert_eq!(rep.id, request.id);
        assert_eq!(rep.error, raised);
    }
}
