//! Client-side signing of requests and verification of replies.

use std::sync::Arc;

use ring::hmac;
use ring::rand::SystemRandom;
use tracing::warn;

use crate::error::{ResponseValidationKind, RpcError, RpcResult};
use crate::protocol::{check_signing_field, Request, Response, Seal};

use super::clock::{Clock, SystemClock};
use super::hmac::{generate_nonce, sign, signing_key, verify};
use super::nonce::NonceStore;
use super::DEFAULT_TIMESTAMP_WINDOW;

/// Signs outgoing requests for one client identity and checks the replies.
pub struct ClientAssistant {
    client: String,
    key: hmac::Key,
    /// Nonces seen on replies to this client.
    nonces: NonceStore,
    window: u64,
    clock: Arc<dyn Clock>,
    rng: SystemRandom,
}

impl ClientAssistant {
    pub fn new(client: impl Into<String>, secret: &[u8]) -> Self {
        Self {
            client: client.into(),
            key: signing_key(secret),
            nonces: NonceStore::new(DEFAULT_TIMESTAMP_WINDOW),
            window: DEFAULT_TIMESTAMP_WINDOW,
            clock: Arc::new(SystemClock),
            rng: SystemRandom::new(),
        }
    }

    /// Set the timestamp tolerance in seconds.
    pub fn with_window(mut self, window: u64) -> Self {
        self.window = window;
        self.nonces = NonceStore::new(window);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    /// Stamp identity, nonce and timestamp onto `request` and sign it.
    ///
    /// Fails with `InvalidRequest` when the method or client name contains
    /// the signing separator.
    pub fn sign_request(&self, request: &mut Request) -> RpcResult<()> {
        check_signing_field("method", &request.method).map_err(RpcError::invalid_request)?;
        check_signing_field("client", &self.client).map_err(RpcError::invalid_request)?;

        request.client = Some(self.client.clone());
        request.seal = Some(Seal {
            nonce: generate_nonce(&self.rng)?,
            timestamp: self.clock.now(),
            signature: String::new(),
        });

        let signature = sign(&self.key, &request.signing_message());
        if let Some(seal) = request.seal.as_mut() {
            seal.signature = signature;
        }
        Ok(())
    }

    /// Verify a reply addressed to this client.
    ///
    /// Checks, in order: the reply names this client, the signature matches,
    /// the nonce is new, the timestamp is inside the window. A missing or
    /// empty signature is always a signature failure.
    pub fn check_response(&self, response: &Response) -> RpcResult<()> {
        if response.client() != Some(self.client.as_str()) {
            warn!(
                expected = %self.client,
                actual = ?response.client(),
                "Reply addressed to a different client"
            );
            return Err(rejected(ResponseValidationKind::ClientMismatch {
                expected: self.client.clone(),
                actual: response.client().map(str::to_string),
            }));
        }

        let seal = response
            .seal()
            .ok_or_else(|| rejected(ResponseValidationKind::Signature))?;

        if !verify(&self.key, &response.signing_message(), &seal.signature) {
            warn!(client = %self.client, "Reply signature mismatch");
            return Err(rejected(ResponseValidationKind::Signature));
        }

        let now = self.clock.now();

        if !self.nonces.check_and_store(&seal.nonce, now) {
            warn!(client = %self.client, nonce = %seal.nonce, "Reply nonce replayed");
            return Err(rejected(ResponseValidationKind::Nonce));
        }

        let skew_seconds = now.abs_diff(seal.timestamp);
        if skew_seconds > self.window {
            warn!(client = %self.client, skew_seconds, "Reply timestamp outside window");
            return Err(rejected(ResponseValidationKind::Timestamp { skew_seconds }));
        }

        Ok(())
    }
}

fn rejected(kind: ResponseValidationKind) -> RpcError {
    RpcError::ResponseValidation { kind }
}

impl std::fmt::Debug for ClientAssistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAssistant")
            .field("client", &self.client)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}
