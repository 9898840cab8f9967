//! Built-in `system.*` methods.

use serde_json::{json, Value};

use crate::auth::{Clock, SystemClock};
use crate::error::RpcResult;
use crate::protocol::Params;

use super::traits::Method;

/// Returns a pong with the server time.
///
/// Used for health checks and verifying the server is responsive.
pub struct PingMethod;

impl Method for PingMethod {
    fn name(&self) -> &str {
        "system.ping"
    }

    fn invoke(&self, _params: &Params) -> RpcResult<Value> {
        Ok(json!({
            "pong": true,
            "timestamp": SystemClock.now(),
        }))
    }
}

/// Returns its first argument (or `message` keyword) unchanged.
pub struct EchoMethod;

impl Method for EchoMethod {
    fn name(&self) -> &str {
        "system.echo"
    }

    fn validate(&self, params: &Params) -> RpcResult<()> {
        params.require(0, "message").map(|_| ())
    }

    fn invoke(&self, params: &Params) -> RpcResult<Value> {
        params.require(0, "message").cloned()
    }
}
