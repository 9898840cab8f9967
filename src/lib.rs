//! Lumo RPC Library
//!
//! Authenticated RPC over pluggable wire formats, serializers and
//! transports. Every message can be signed with a per-client HMAC key and
//! carries a nonce and timestamp for replay protection.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod rpc;
pub mod serializer;
pub mod transport;

pub use error::{RpcError, RpcResult};
pub use rpc::{Client, Server};
