//! Call orchestration.
//!
//! `Client` runs create → sign → send → parse → verify for each call;
//! `Server` runs parse → verify → dispatch → sign → encode for each message.

mod client;
mod server;

pub use client::Client;
pub use server::Server;

use crate::error::{RpcError, RpcResult};
use crate::protocol::ProtocolCodec;

/// Assistants need a wire format that carries the authentication fields.
fn require_signed_format(codec: &ProtocolCodec) -> RpcResult<()> {
    if codec.format().is_signed() {
        Ok(())
    } else {
        Err(RpcError::Config {
            message: format!(
                "Authentication requires a signed wire format, not '{}'",
                codec.format()
            ),
        })
    }
}
