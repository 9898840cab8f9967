//! Method registry for dispatching requests to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::{ProtocolErrorKind, RpcError, RpcResult, TransportErrorKind};
use crate::protocol::Request;

use super::system::{EchoMethod, PingMethod};
use super::traits::{Dispatcher, Method};

/// Registry of named methods.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn Method>>,
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in `system.*` methods.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PingMethod));
        registry.register(Arc::new(EchoMethod));

        info!(count = registry.methods.len(), "Method registry initialized");

        registry
    }

    /// Register a method, replacing any method with the same name.
    pub fn register(&mut self, method: Arc<dyn Method>) {
        let name = method.name().to_string();
        debug!(method = %name, "Registering method");
        self.methods.insert(name, method);
    }

    /// Get a method by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Method>> {
        self.methods.get(name).cloned()
    }

    /// List all registered method names.
    pub fn list_methods(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }
}

#[async_trait]
impl Dispatcher for MethodRegistry {
    async fn dispatch(&self, request: &Request) -> RpcResult<Value> {
        let method = self.get(&request.method).ok_or_else(|| RpcError::Protocol {
            kind: ProtocolErrorKind::MethodNotFound {
                method: request.method.clone(),
            },
        })?;

        method.validate(&request.params)?;

        // Methods are synchronous; keep them off the async workers
        let params = request.params.clone();
        tokio::task::spawn_blocking(move || method.invoke(&params))
            .await
            .map_err(|e| {
                error!(method = %request.method, error = %e, "Method task panicked");
                RpcError::Transport {
                    kind: TransportErrorKind::Other {
                        message: format!("Method task failed: {}", e),
                    },
                }
            })?
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.list_methods();
        names.sort_unstable();
        f.debug_struct("MethodRegistry")
            .field("methods", &names)
            .finish()
    }
}
