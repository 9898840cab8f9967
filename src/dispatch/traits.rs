//! Dispatcher and method traits.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::RpcResult;
use crate::protocol::{Params, Request};

/// Executes a verified request and produces its result.
///
/// Errors are mapped onto the wire taxonomy by the server; raise
/// `RpcError::Remote` to send a precise code.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: &Request) -> RpcResult<Value>;
}

/// A named remote method.
///
/// # Example
///
/// ```ignore
/// pub struct AddMethod;
///
/// impl Method for AddMethod {
///     fn name(&self) -> &str {
///         "math.add"
///     }
///
///     fn validate(&self, params: &Params) -> RpcResult<()> {
///         params.require_i64(0, "a")?;
///         params.require_i64(1, "b")?;
///         Ok(())
///     }
///
///     fn invoke(&self, params: &Params) -> RpcResult<Value> {
///         Ok(json!(params.require_i64(0, "a")? + params.require_i64(1, "b")?))
///     }
/// }
/// ```
pub trait Method: Send + Sync {
    /// Name used in requests to invoke this method (e.g. "system.ping").
    fn name(&self) -> &str;

    /// Check the parameters before `invoke` runs.
    fn validate(&self, _params: &Params) -> RpcResult<()> {
        Ok(())
    }

    /// Run the method.
    ///
    /// Note: This is called from a blocking context via `spawn_blocking`.
    fn invoke(&self, params: &Params) -> RpcResult<Value>;
}

/// Adapts a closure into a `Method`.
pub struct FnMethod<F> {
    name: String,
    func: F,
}

impl<F> FnMethod<F>
where
    F: Fn(&Params) -> RpcResult<Value> + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Method for FnMethod<F>
where
    F: Fn(&Params) -> RpcResult<Value> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, params: &Params) -> RpcResult<Value> {
        (self.func)(params)
    }
}
