//! Authentication module.
//!
//! HMAC signing of requests and replies, nonce tracking for replay
//! protection, timestamp freshness and per-client key lookup.

mod client;
mod clock;
mod hmac;
mod keys;
mod nonce;
mod server;

pub use client::ClientAssistant;
pub use clock::{Clock, ManualClock, SystemClock};
pub use hmac::{generate_nonce, sign, signing_key, verify, NONCE_BYTES};
pub use keys::{load_keys_file, KeyStore, SharedKeyStore};
pub use nonce::NonceStore;
pub use server::ServerAssistant;

/// Default timestamp tolerance in seconds.
pub const DEFAULT_TIMESTAMP_WINDOW: u64 = 3600;

/// Default cap on nonces remembered per client within one window.
pub const DEFAULT_MAX_NONCES_PER_CLIENT: usize = 100_000;
