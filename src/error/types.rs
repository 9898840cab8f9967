//! Error types for the RPC core.
//!
//! `RpcError` is the local failure that aborts a call or a request. The wire
//! payload sent to the peer is `WireError`; `RpcError::wire_error` is the one
//! place where the two meet.

use serde_json::Value;
use thiserror::Error;

use super::codes::{ErrorKind, WireError};

/// Main error type for the RPC core.
#[derive(Error, Debug)]
pub enum RpcError {
    /// A taxonomy error carrying an explicit code, raised by application
    /// code or decoded from an error reply.
    #[error("RPC error {}: {}", .0.code, .0.message)]
    Remote(WireError),

    /// Request-side shape and lookup failures.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// Server-side authentication failures.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// Client-side verification of a reply failed.
    #[error("Response validation failed: {kind}")]
    ResponseValidation { kind: ResponseValidationKind },

    /// The server sent something that is not a valid reply.
    #[error("Invalid reply: {message}")]
    BadReply { message: String },

    /// `call` was used before `open` or after `close`.
    #[error("Client is closed")]
    ClientClosed,

    /// Transport-level failures.
    #[error("Transport error: {kind}")]
    Transport { kind: TransportErrorKind },

    /// Encoding or decoding through a serializer failed.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Protocol error kinds (request path).
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },
}

/// Authentication error kinds raised while checking a request.
#[derive(Error, Debug)]
pub enum AuthErrorKind {
    #[error("Unknown client: {client}")]
    UnknownClient { client: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Timestamp outside window: skew {skew_seconds}s")]
    StaleTimestamp { skew_seconds: u64 },

    #[error("Nonce already used (replay attack detected)")]
    NonceReused,

    #[error("Too many outstanding nonces for this client")]
    NonceStoreFull,

    #[error("Request is missing authentication field '{field}'")]
    MissingField { field: &'static str },

    #[error("Failed to load client keys: {message}")]
    KeyStoreError { message: String },

    #[error("Secure random generator failed")]
    RandomUnavailable,
}

/// Reasons a client rejects a reply.
#[derive(Error, Debug)]
pub enum ResponseValidationKind {
    #[error("client mismatch: expected '{expected}', got {actual:?}")]
    ClientMismatch {
        expected: String,
        actual: Option<String>,
    },

    #[error("signature error")]
    Signature,

    #[error("nonce error")]
    Nonce,

    #[error("timestamp error: skew {skew_seconds}s")]
    Timestamp { skew_seconds: u64 },
}

/// Transport error kinds.
#[derive(Error, Debug)]
pub enum TransportErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,

    #[error("Transport is not active")]
    NotActive,

    #[error("No reply received")]
    NoReply,

    #[error("{message}")]
    Other { message: String },
}

impl RpcError {
    /// Shorthand for an `InvalidRequest` protocol error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        RpcError::Protocol {
            kind: ProtocolErrorKind::InvalidRequest {
                message: message.into(),
            },
        }
    }

    /// Shorthand for an `InvalidParams` protocol error.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        RpcError::Protocol {
            kind: ProtocolErrorKind::InvalidParams {
                message: message.into(),
            },
        }
    }

    /// Shorthand for a `BadReply` error.
    pub fn bad_reply(message: impl Into<String>) -> Self {
        RpcError::BadReply {
            message: message.into(),
        }
    }

    /// The taxonomy kind this error belongs to, if any.
    ///
    /// Errors that only make sense locally (closed client, bad reply,
    /// transport, ...) have no kind and surface as `InternalError` on the
    /// wire.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            RpcError::Remote(wire) => ErrorKind::from_code(wire.code),
            RpcError::Protocol { kind } => Some(match kind {
                ProtocolErrorKind::Parse { .. } => ErrorKind::ParseError,
                ProtocolErrorKind::InvalidRequest { .. } => ErrorKind::InvalidRequest,
                ProtocolErrorKind::MethodNotFound { .. } => ErrorKind::MethodNotFound,
                ProtocolErrorKind::InvalidParams { .. } => ErrorKind::InvalidParams,
            }),
            RpcError::Auth { kind } => match kind {
                AuthErrorKind::UnknownClient { .. } => Some(ErrorKind::UnknownClient),
                AuthErrorKind::InvalidSignature => Some(ErrorKind::SignatureError),
                AuthErrorKind::StaleTimestamp { .. } => Some(ErrorKind::TimestampError),
                AuthErrorKind::NonceReused | AuthErrorKind::NonceStoreFull => {
                    Some(ErrorKind::NonceError)
                }
                AuthErrorKind::MissingField { .. } => Some(ErrorKind::InvalidRequest),
                AuthErrorKind::KeyStoreError { .. } | AuthErrorKind::RandomUnavailable => None,
            },
            _ => None,
        }
    }

    /// Map this failure onto the wire taxonomy.
    ///
    /// A `Remote` error whose code is recognised passes through unchanged,
    /// `data` included. Everything without a recognised kind becomes a bare
    /// `InternalError` so no internal error text leaves the process.
    pub fn wire_error(&self) -> WireError {
        match (self, self.kind()) {
            (RpcError::Remote(wire), Some(_)) => wire.clone(),
            (
                RpcError::Protocol {
                    kind: ProtocolErrorKind::InvalidParams { message },
                },
                _,
            ) => WireError::from_kind(ErrorKind::InvalidParams)
                .with_data(Value::String(message.clone())),
            (_, Some(kind)) => WireError::from_kind(kind),
            (_, None) => WireError::from_kind(ErrorKind::InternalError),
        }
    }
}

impl From<WireError> for RpcError {
    fn from(wire: WireError) -> Self {
        RpcError::Remote(wire)
    }
}

/// Result type alias for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;
