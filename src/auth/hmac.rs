//! HMAC-SHA256 message signing and verification.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{AuthErrorKind, RpcError};

/// Random bytes per nonce (hex-encoded on the wire).
pub const NONCE_BYTES: usize = 16;

/// Build an HMAC-SHA256 key from a shared secret.
pub fn signing_key(secret: &[u8]) -> hmac::Key {
    hmac::Key::new(hmac::HMAC_SHA256, secret)
}

/// Sign `message` and return the base64 tag.
pub fn sign(key: &hmac::Key, message: &str) -> String {
    let tag = hmac::sign(key, message.as_bytes());
    BASE64_STANDARD.encode(tag.as_ref())
}

/// Verify a base64 tag over `message` in constant time.
///
/// An empty or undecodable signature never verifies.
pub fn verify(key: &hmac::Key, message: &str, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    match BASE64_STANDARD.decode(signature) {
        Ok(tag) => hmac::verify(key, message.as_bytes(), &tag).is_ok(),
        Err(_) => false,
    }
}

/// Generate a fresh nonce: `NONCE_BYTES` random bytes, hex-encoded.
pub fn generate_nonce(rng: &SystemRandom) -> Result<String, RpcError> {
    let mut bytes = [0u8; NONCE_BYTES];
    rng.fill(&mut bytes).map_err(|_| RpcError::Auth {
        kind: AuthErrorKind::RandomUnavailable,
    })?;
    Ok(hex::encode(bytes))
}
