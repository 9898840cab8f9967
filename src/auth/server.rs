//! Server-side verification of requests and signing of replies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ring::rand::SystemRandom;
use tracing::{debug, warn};

use crate::error::{AuthErrorKind, RpcError, RpcResult};
use crate::protocol::{Request, Response, Seal};

use super::clock::{Clock, SystemClock};
use super::hmac::{generate_nonce, sign, signing_key, verify};
use super::keys::KeyStore;
use super::nonce::NonceStore;
use super::{DEFAULT_MAX_NONCES_PER_CLIENT, DEFAULT_TIMESTAMP_WINDOW};

/// Verifies signed requests against per-client keys and signs the replies.
///
/// Nonces are tracked per client identity; one client cannot burn
/// another client's nonces. A nonce is recorded before the signature is
/// checked, so anyone who knows a client name can fill that client's store;
/// each store is capped at `nonce_limit` entries and refuses new nonces
/// once full.
pub struct ServerAssistant {
    keys: Arc<dyn KeyStore>,
    nonces: Mutex<HashMap<String, Arc<NonceStore>>>,
    window: u64,
    nonce_limit: usize,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
}

impl ServerAssistant {
    pub fn new(keys: Arc<dyn KeyStore>) -> Self {
        Self {
            keys,
            nonces: Mutex::new(HashMap::new()),
            window: DEFAULT_TIMESTAMP_WINDOW,
            nonce_limit: DEFAULT_MAX_NONCES_PER_CLIENT,
            clock: Arc::new(SystemClock),
            rng: SystemRandom::new(),
        }
    }

    /// Set the timestamp tolerance in seconds.
    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self
    }

    /// Set how many nonces one client may have outstanding.
    pub fn with_nonce_limit(mut self, limit: usize) -> Self {
        self.nonce_limit = limit;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn window(&self) -> u64 {
        self.window
    }

    /// Verify a parsed request.
    ///
    /// Checks, in order: the client has a key, the timestamp is inside the
    /// window, the nonce is new for this client, the signature matches. The
    /// signature is never computed for an unknown client.
    pub fn check_request(&self, request: &Request) -> RpcResult<()> {
        let client = request.client.as_deref().ok_or_else(|| RpcError::Auth {
            kind: AuthErrorKind::MissingField { field: "client" },
        })?;
        let seal = request.seal.as_ref().ok_or_else(|| RpcError::Auth {
            kind: AuthErrorKind::MissingField { field: "signature" },
        })?;

        let secret = self.keys.secret(client).ok_or_else(|| {
            warn!(client = %client, method = %request.method, "Request from unknown client");
            RpcError::Auth {
                kind: AuthErrorKind::UnknownClient {
                    client: client.to_string(),
                },
            }
        })?;

        let now = self.clock.now();

        let skew_seconds = now.abs_diff(seal.timestamp);
        if skew_seconds > self.window {
            warn!(client = %client, skew_seconds, "Request timestamp outside window");
            return Err(RpcError::Auth {
                kind: AuthErrorKind::StaleTimestamp { skew_seconds },
            });
        }

        let store = self.store_for(client);
        if !store.check_and_store(&seal.nonce, now) {
            let kind = if store.is_full() {
                warn!(client = %client, limit = self.nonce_limit, "Nonce store full");
                AuthErrorKind::NonceStoreFull
            } else {
                warn!(client = %client, nonce = %seal.nonce, "Replay attack detected: nonce reused");
                AuthErrorKind::NonceReused
            };
            return Err(RpcError::Auth { kind });
        }

        if !verify(&signing_key(&secret), &request.signing_message(), &seal.signature) {
            warn!(client = %client, method = %request.method, "Request signature mismatch");
            return Err(RpcError::Auth {
                kind: AuthErrorKind::InvalidSignature,
            });
        }

        debug!(client = %client, method = %request.method, "Request authenticated");
        Ok(())
    }

    /// Stamp a fresh nonce and timestamp onto `response` and sign it.
    ///
    /// Without a key for the reply's client the signature is left empty;
    /// clients reject such replies.
    pub fn sign_response(&self, response: &mut Response) -> RpcResult<()> {
        response.set_seal(Seal {
            nonce: generate_nonce(&self.rng)?,
            timestamp: self.clock.now(),
            signature: String::new(),
        });

        let secret = response.client().and_then(|client| self.keys.secret(client));
        let signature = match secret {
            Some(secret) => sign(&signing_key(&secret), &response.signing_message()),
            None => {
                warn!(
                    client = ?response.client(),
                    "No key for reply client, sending unsigned reply"
                );
                return Ok(());
            }
        };

        if let Some(seal) = response.seal().cloned() {
            response.set_seal(Seal { signature, ..seal });
        }
        Ok(())
    }

    /// Prune expired nonces for every client and forget clients with none left.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        let mut stores = self.nonces.lock().unwrap_or_else(|e| e.into_inner());
        stores.retain(|_, store| {
            store.cleanup(now);
            !store.is_empty()
        });
    }

    /// Number of clients with tracked nonces.
    pub fn tracked_clients(&self) -> usize {
        self.nonces.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Start a background cleanup task.
    ///
    /// This spawns a tokio task that periodically prunes expired nonces.
    pub fn start_cleanup_task(self: &Arc<Self>, interval: Duration) {
        let assistant = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            loop {
                interval_timer.tick().await;
                assistant.cleanup();
                debug!(
                    clients = assistant.tracked_clients(),
                    "Nonce cleanup completed"
                );
            }
        });
    }

    fn store_for(&self, client: &str) -> Arc<NonceStore> {
        let mut stores = self.nonces.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            stores
                .entry(client.to_string())
                .or_insert_with(|| {
                    Arc::new(NonceStore::new(self.window).with_limit(self.nonce_limit))
                }),
        )
    }
}

impl std::fmt::Debug for ServerAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerAssistant")
            .field("window", &self.window)
            .field("tracked_clients", &self.tracked_clients())
            .finish_non_exhaustive()
    }
}
