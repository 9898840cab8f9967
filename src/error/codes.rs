//! Wire error taxonomy.
//!
//! Codes follow JSON-RPC 2.0. The authentication kinds live at the top of the
//! server-error range so peers that only know plain JSON-RPC still see a
//! server error.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PARSE_ERROR_CODE: i64 = -32700;
pub const INVALID_REQUEST_CODE: i64 = -32600;
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;
pub const INVALID_PARAMS_CODE: i64 = -32602;
pub const INTERNAL_ERROR_CODE: i64 = -32603;

pub const UNKNOWN_CLIENT_CODE: i64 = -32001;
pub const SIGNATURE_ERROR_CODE: i64 = -32002;
pub const TIMESTAMP_ERROR_CODE: i64 = -32003;
pub const NONCE_ERROR_CODE: i64 = -32004;

pub const MIN_SERVER_ERROR_CODE: i64 = -32099;
pub const MAX_SERVER_ERROR_CODE: i64 = -32000;

/// Error kinds shared by client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    UnknownClient,
    SignatureError,
    TimestampError,
    NonceError,
    /// Application-defined error in the reserved server range.
    ServerError(i64),
}

/// Fixed `(kind, code, message)` table. Server errors are handled by range.
const TAXONOMY: &[(ErrorKind, i64, &str)] = &[
    (ErrorKind::ParseError, PARSE_ERROR_CODE, "Parse error"),
    (ErrorKind::InvalidRequest, INVALID_REQUEST_CODE, "Invalid Request"),
    (ErrorKind::MethodNotFound, METHOD_NOT_FOUND_CODE, "Method not found"),
    (ErrorKind::InvalidParams, INVALID_PARAMS_CODE, "Invalid params"),
    (ErrorKind::InternalError, INTERNAL_ERROR_CODE, "Internal error"),
    (ErrorKind::UnknownClient, UNKNOWN_CLIENT_CODE, "Unknown client"),
    (ErrorKind::SignatureError, SIGNATURE_ERROR_CODE, "Signature error"),
    (ErrorKind::TimestampError, TIMESTAMP_ERROR_CODE, "Timestamp error"),
    (ErrorKind::NonceError, NONCE_ERROR_CODE, "Nonce error"),
];

impl ErrorKind {
    /// Whether `code` lies in the application server-error range.
    pub fn is_server_error_code(code: i64) -> bool {
        (MIN_SERVER_ERROR_CODE..=MAX_SERVER_ERROR_CODE).contains(&code)
    }

    /// Resolve a wire code. Reserved codes win over the server range.
    pub fn from_code(code: i64) -> Option<Self> {
        TAXONOMY
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(kind, _, _)| *kind)
            .or_else(|| Self::is_server_error_code(code).then_some(ErrorKind::ServerError(code)))
    }

    pub fn code(&self) -> i64 {
        match self {
            ErrorKind::ServerError(code) => *code,
            kind => TAXONOMY
                .iter()
                .find(|(k, _, _)| k == kind)
                .map(|(_, code, _)| *code)
                .unwrap_or(INTERNAL_ERROR_CODE),
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorKind::ServerError(_) => "Server error",
            kind => TAXONOMY
                .iter()
                .find(|(k, _, _)| k == kind)
                .map(|(_, _, message)| *message)
                .unwrap_or("Internal error"),
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.default_message(), self.code())
    }
}

/// Error payload as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl WireError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Payload for a taxonomy kind with its default message.
    pub fn from_kind(kind: ErrorKind) -> Self {
        Self::new(kind.code(), kind.default_message())
    }

    /// Application server error with a code from the reserved range.
    ///
    /// Returns `None` when the code lies outside the range.
    pub fn server_error(code: i64, message: impl Into<String>) -> Option<Self> {
        ErrorKind::is_server_error_code(code).then(|| Self::new(code, message))
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        ErrorKind::from_code(self.code)
    }

    /// Object form used both on the wire and in the canonical signing string.
    pub fn to_value(&self) -> Value {
        let mut error = Map::new();
        error.insert("code".to_string(), Value::from(self.code));
        error.insert("message".to_string(), Value::String(self.message.clone()));
        if let Some(data) = &self.data {
            error.insert("data".to_string(), data.clone());
        }
        Value::Object(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_codes_round_trip() {
        for (kind, code, _) in TAXONOMY {
            assert_eq!(ErrorKind::from_code(*code), Some(*kind));
            assert_eq!(kind.code(), *code);
        }
    }

    #[test]
    fn test_server_error_range() {
        assert_eq!(ErrorKind::from_code(-32000), Some(ErrorKind::ServerError(-32000)));
        assert_eq!(ErrorKind::from_code(-32099), Some(ErrorKind::ServerError(-32099)));
        assert_eq!(ErrorKind::from_code(-32100), None);
        assert_eq!(ErrorKind::from_code(-31999), None);
        // Reserved auth codes sit inside the range but resolve to their own kinds
        assert_eq!(ErrorKind::from_code(-32003), Some(ErrorKind::TimestampError));
    }

    #[test]
    fn test_server_error_constructor_validates_range() {
        assert!(WireError::server_error(-32050, "busy").is_some());
        assert!(WireError::server_error(-1, "nope").is_none());
    }

    #[test]
    fn test_to_value_omits_missing_data() {
        let value = WireError::from_kind(ErrorKind::MethodNotFound).to_value();
        assert_eq!(value, serde_json::json!({"code": -32601, "message": "Method not found"}));
    }
}
