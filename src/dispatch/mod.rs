//! Method dispatch.
//!
//! The server hands each verified request to a `Dispatcher`; the
//! `MethodRegistry` is the stock implementation.

mod registry;
mod system;
mod traits;

pub use registry::MethodRegistry;
pub use system::{EchoMethod, PingMethod};
pub use traits::{Dispatcher, FnMethod, Method};
