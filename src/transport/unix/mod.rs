//! Unix domain socket transport.
//!
//! Each message travels as one length-prefixed frame. A connection carries
//! any number of request/reply exchanges; one-way requests get no reply frame.

mod client;
mod connection;
mod listener;

pub use client::UnixClientTransport;
pub use listener::{ConnectionStats, UnixServerConfig, UnixServerTransport};
