//! Request types for the RPC protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{RpcError, RpcResult};

use super::canonical::canonical_json;

/// Call identifier correlating a reply with its request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallId {
    Int(i64),
    Str(String),
}

impl CallId {
    pub fn to_value(&self) -> Value {
        match self {
            CallId::Int(id) => Value::from(*id),
            CallId::Str(id) => Value::String(id.clone()),
        }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallId::Int(id) => write!(f, "{}", id),
            CallId::Str(id) => f.write_str(id),
        }
    }
}

/// Call parameters: positional or keyword, never both.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Params {
    #[default]
    None,
    Args(Vec<Value>),
    Kwargs(Map<String, Value>),
}

impl Params {
    /// Build params from the two call-site collections.
    ///
    /// Fails with `InvalidRequest` when both are non-empty.
    pub fn from_parts(args: Vec<Value>, kwargs: Map<String, Value>) -> RpcResult<Self> {
        match (args.is_empty(), kwargs.is_empty()) {
            (false, false) => Err(RpcError::invalid_request(
                "Does not support args and kwargs at the same time",
            )),
            (false, true) => Ok(Params::Args(args)),
            (true, false) => Ok(Params::Kwargs(kwargs)),
            (true, true) => Ok(Params::None),
        }
    }

    /// Positional arguments (empty unless `Args`).
    pub fn args(&self) -> &[Value] {
        match self {
            Params::Args(args) => args,
            _ => &[],
        }
    }

    /// Keyword arguments, if any.
    pub fn kwargs(&self) -> Option<&Map<String, Value>> {
        match self {
            Params::Kwargs(kwargs) => Some(kwargs),
            _ => None,
        }
    }

    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        match self {
            Params::None => true,
            Params::Args(args) => args.is_empty(),
            Params::Kwargs(kwargs) => kwargs.is_empty(),
        }
    }

    /// Wire value; empty params are omitted.
    pub fn to_value(&self) -> Option<Value> {
        if self.is_empty() {
            return None;
        }
        match self {
            Params::Args(args) => Some(Value::Array(args.clone())),
            Params::Kwargs(kwargs) => Some(Value::Object(kwargs.clone())),
            Params::None => None,
        }
    }

    /// Look up an argument by position, falling back to its keyword name.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        match self {
            Params::Args(args) => args.get(index),
            Params::Kwargs(kwargs) => kwargs.get(name),
            Params::None => None,
        }
    }

    /// Get a required argument.
    pub fn require(&self, index: usize, name: &str) -> RpcResult<&Value> {
        self.get(index, name)
            .ok_or_else(|| RpcError::invalid_params(format!("Missing required parameter: {}", name)))
    }

    /// Get a required integer argument.
    pub fn require_i64(&self, index: usize, name: &str) -> RpcResult<i64> {
        self.require(index, name)?.as_i64().ok_or_else(|| {
            RpcError::invalid_params(format!("Parameter '{}' must be an integer", name))
        })
    }

    /// Get a required string argument.
    pub fn require_str(&self, index: usize, name: &str) -> RpcResult<&str> {
        self.require(index, name)?.as_str().ok_or_else(|| {
            RpcError::invalid_params(format!("Parameter '{}' must be a string", name))
        })
    }
}

/// Authentication fields stamped onto a message by the signing side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seal {
    /// Single-use random token.
    pub nonce: String,
    /// Unix timestamp (seconds) when the message was signed.
    pub timestamp: i64,
    /// Base64 HMAC-SHA256 over the canonical string.
    pub signature: String,
}

/// A call request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Method to invoke.
    pub method: String,

    /// Absent for one-way requests.
    pub id: Option<CallId>,

    pub params: Params,

    /// Caller identity (authenticated format only).
    pub client: Option<String>,

    /// Nonce, timestamp and signature (authenticated format only).
    pub seal: Option<Seal>,
}

impl Request {
    pub fn new(method: impl Into<String>, id: Option<CallId>, params: Params) -> Self {
        Self {
            method: method.into(),
            id,
            params,
            client: None,
            seal: None,
        }
    }

    /// No reply is expected for a request without id.
    pub fn is_one_way(&self) -> bool {
        self.id.is_none()
    }

    /// Get the message to sign.
    ///
    /// Format: `{client}:{method}:{id}:{nonce}:{timestamp}:{params_json}`
    pub fn signing_message(&self) -> String {
        let (nonce, timestamp) = seal_parts(self.seal.as_ref());
        format!(
            "{}:{}:{}:{}:{}:{}",
            self.client.as_deref().unwrap_or_default(),
            self.method,
            self.id.as_ref().map(|id| id.to_string()).unwrap_or_default(),
            nonce,
            timestamp,
            self.params
                .to_value()
                .map(|params| canonical_json(&params))
                .unwrap_or_default()
        )
    }
}

/// Field separator in signing messages.
pub const SIGNING_SEPARATOR: char = ':';

/// Reject `value` for a signing message field other than the last one.
///
/// Only the trailing structured part may contain the separator; anything
/// earlier would let field boundaries shift without changing the string.
pub(crate) fn check_signing_field(field: &str, value: &str) -> Result<(), String> {
    if value.contains(SIGNING_SEPARATOR) {
        Err(format!("{} must not contain '{}'", field, SIGNING_SEPARATOR))
    } else {
        Ok(())
    }
}

/// Nonce and timestamp as they appear in a signing message.
pub(super) fn seal_parts(seal: Option<&Seal>) -> (&str, String) {
    match seal {
        Some(seal) => (seal.nonce.as_str(), seal.timestamp.to_string()),
        None => ("", String::new()),
    }
}
