//! Error types for the RPC core.
//!
//! Local failures (`RpcError`, via thiserror) are kept apart from the wire
//! error payload (`WireError`) and the fixed taxonomy that maps between them.

mod codes;
mod types;

pub use codes::*;
pub use types::*;
