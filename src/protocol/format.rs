//! Supported wire formats.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::RpcError;

/// The closed set of wire formats a codec can speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum WireFormat {
    /// JSON-RPC 2.0 message shape.
    #[serde(rename = "jsonrpc")]
    JsonRpc,
    /// JSON-RPC 2.0 plus client identity, nonce, timestamp and signature.
    #[serde(rename = "jsonsrpc")]
    SignedJsonRpc,
    /// Separate `args` / `kwargs` keys under a `pyrpc` version tag.
    #[serde(rename = "pyrpc")]
    PyRpc,
}

const JSONRPC_REQUEST_KEYS: &[&str] = &["jsonrpc", "id", "method", "params"];
const JSONRPC_REPLY_KEYS: &[&str] = &["jsonrpc", "id", "result", "error"];
const SIGNED_REQUEST_KEYS: &[&str] = &[
    "jsonrpc",
    "id",
    "method",
    "params",
    "client",
    "nonce",
    "timestamp",
    "signature",
];
const SIGNED_REPLY_KEYS: &[&str] = &[
    "jsonrpc",
    "id",
    "result",
    "error",
    "client",
    "nonce",
    "timestamp",
    "signature",
];
const PYRPC_REQUEST_KEYS: &[&str] = &["pyrpc", "id", "method", "args", "kwargs"];
const PYRPC_REPLY_KEYS: &[&str] = &["pyrpc", "id", "result", "error"];

impl WireFormat {
    pub fn name(&self) -> &'static str {
        match self {
            WireFormat::JsonRpc => "jsonrpc",
            WireFormat::SignedJsonRpc => "jsonsrpc",
            WireFormat::PyRpc => "pyrpc",
        }
    }

    /// Key holding the protocol version tag.
    pub fn version_key(&self) -> &'static str {
        match self {
            WireFormat::JsonRpc | WireFormat::SignedJsonRpc => "jsonrpc",
            WireFormat::PyRpc => "pyrpc",
        }
    }

    pub fn version(&self) -> &'static str {
        match self {
            WireFormat::JsonRpc | WireFormat::SignedJsonRpc => "2.0",
            WireFormat::PyRpc => "1.0",
        }
    }

    /// Whether messages carry client, nonce, timestamp and signature.
    pub fn is_signed(&self) -> bool {
        matches!(self, WireFormat::SignedJsonRpc)
    }

    pub fn request_keys(&self) -> &'static [&'static str] {
        match self {
            WireFormat::JsonRpc => JSONRPC_REQUEST_KEYS,
            WireFormat::SignedJsonRpc => SIGNED_REQUEST_KEYS,
            WireFormat::PyRpc => PYRPC_REQUEST_KEYS,
        }
    }

    pub fn reply_keys(&self) -> &'static [&'static str] {
        match self {
            WireFormat::JsonRpc => JSONRPC_REPLY_KEYS,
            WireFormat::SignedJsonRpc => SIGNED_REPLY_KEYS,
            WireFormat::PyRpc => PYRPC_REPLY_KEYS,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WireFormat {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jsonrpc" => Ok(WireFormat::JsonRpc),
            "jsonsrpc" => Ok(WireFormat::SignedJsonRpc),
            "pyrpc" => Ok(WireFormat::PyRpc),
            other => Err(RpcError::Config {
                message: format!(
                    "Invalid wire format '{}'. Valid formats: jsonrpc, jsonsrpc, pyrpc",
                    other
                ),
            }),
        }
    }
}
