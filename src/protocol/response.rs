//! Response types for the RPC protocol.

use serde_json::Value;

use crate::error::{RpcError, WireError};

use super::canonical::canonical_json;
use super::request::{seal_parts, CallId, Seal};

/// A successful reply.
#[derive(Debug, Clone, PartialEq)]
pub struct SuccessResponse {
    /// Id of the originating request.
    pub id: Option<CallId>,
    pub result: Value,
    pub client: Option<String>,
    pub seal: Option<Seal>,
}

/// An error reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponse {
    /// Null when the failure happened before a request id was known.
    pub id: Option<CallId>,
    pub error: WireError,
    pub client: Option<String>,
    pub seal: Option<Seal>,
}

impl ErrorResponse {
    /// Convert the reply into the error the caller sees.
    pub fn to_error(&self) -> RpcError {
        RpcError::Remote(self.error.clone())
    }
}

/// Either kind of reply. Exactly one of result / error exists by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Success(SuccessResponse),
    Error(ErrorResponse),
}

impl Response {
    pub fn id(&self) -> Option<&CallId> {
        match self {
            Response::Success(rep) => rep.id.as_ref(),
            Response::Error(rep) => rep.id.as_ref(),
        }
    }

    pub fn client(&self) -> Option<&str> {
        match self {
            Response::Success(rep) => rep.client.as_deref(),
            Response::Error(rep) => rep.client.as_deref(),
        }
    }

    pub fn seal(&self) -> Option<&Seal> {
        match self {
            Response::Success(rep) => rep.seal.as_ref(),
            Response::Error(rep) => rep.seal.as_ref(),
        }
    }

    pub fn set_seal(&mut self, seal: Seal) {
        match self {
            Response::Success(rep) => rep.seal = Some(seal),
            Response::Error(rep) => rep.seal = Some(seal),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }

    /// Get the message to sign.
    ///
    /// Format: `{client}:{id}:{nonce}:{timestamp}:{result_or_error_json}`
    pub fn signing_message(&self) -> String {
        let (nonce, timestamp) = seal_parts(self.seal());
        let payload = match self {
            Response::Success(rep) => canonical_json(&rep.result),
            Response::Error(rep) => canonical_json(&rep.error.to_value()),
        };
        format!(
            "{}:{}:{}:{}:{}",
            self.client().unwrap_or_default(),
            self.id().map(|id| id.to_string()).unwrap_or_default(),
            nonce,
            timestamp,
            payload
        )
    }
}

impl From<SuccessResponse> for Response {
    fn from(rep: SuccessResponse) -> Self {
        Response::Success(rep)
    }
}

impl From<ErrorResponse> for Response {
    fn from(rep: ErrorResponse) -> Self {
        Response::Error(rep)
    }
}
