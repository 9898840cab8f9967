//! Byte encodings for structured messages.
//!
//! The codec produces `serde_json::Value` trees; a `Serializer` turns them
//! into bytes for the transport and back. The serializer is chosen once at
//! construction and injected where it is needed.

mod json;
mod msgpack;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RpcError, RpcResult};

pub use json::JsonSerializer;
pub use msgpack::MsgPackSerializer;

/// Converts structured data to bytes and back.
pub trait Serializer: Send + Sync {
    fn encode(&self, data: &Value) -> RpcResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> RpcResult<Value>;
}

/// Serializer selection as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SerializerKind {
    #[default]
    Json,
    Msgpack,
}

impl SerializerKind {
    pub fn build(self) -> Arc<dyn Serializer> {
        match self {
            SerializerKind::Json => Arc::new(JsonSerializer),
            SerializerKind::Msgpack => Arc::new(MsgPackSerializer),
        }
    }
}

impl fmt::Display for SerializerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerializerKind::Json => f.write_str("json"),
            SerializerKind::Msgpack => f.write_str("msgpack"),
        }
    }
}

impl FromStr for SerializerKind {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(SerializerKind::Json),
            "msgpack" => Ok(SerializerKind::Msgpack),
            other => Err(RpcError::Config {
                message: format!("Unknown serializer: {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse() {
        assert_eq!("JSON".parse::<SerializerKind>().unwrap(), SerializerKind::Json);
        assert_eq!("msgpack".parse::<SerializerKind>().unwrap(), SerializerKind::Msgpack);
        assert!("xml".parse::<SerializerKind>().is_err());
    }

    #[test]
    fn test_every_kind_carries_a_request() {
        let message = json!({
            "jsonrpc": "2.0",
            "method": "add",
            "id": 1,
            "params": {"a": [1, 2.5, null], "b": "x"}
        });
        for kind in [SerializerKind::Json, SerializerKind::Msgpack] {
            let serializer = kind.build();
            let bytes = serializer.encode(&message).unwrap();
            assert_eq!(serializer.decode(&bytes).unwrap(), message, "{}", kind);
        }
    }
}
