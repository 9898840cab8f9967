//! In-memory nonce store for replay attack prevention.

use std::collections::HashMap;
use std::sync::Mutex;

/// Thread-safe nonce store with window-based expiry.
///
/// Each check prunes, tests and records under one lock, so two concurrent
/// checks can never both accept the same nonce.
pub struct NonceStore {
    /// Map of nonce -> time it was first seen (Unix seconds).
    nonces: Mutex<HashMap<String, i64>>,
    /// How long a nonce stays remembered, in seconds.
    window: u64,
    /// Most nonces remembered at once; new nonces are refused beyond it.
    limit: Option<usize>,
}

impl NonceStore {
    /// Create a new nonce store with the given window.
    pub fn new(window: u64) -> Self {
        Self {
            nonces: Mutex::new(HashMap::new()),
            window,
            limit: None,
        }
    }

    /// Refuse new nonces while `limit` unexpired ones are stored.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Check if a nonce has been used within the window, and store it if not.
    ///
    /// Returns `true` if the nonce is new (valid), `false` if already used
    /// or the store is full.
    pub fn check_and_store(&self, nonce: &str, now: i64) -> bool {
        let mut nonces = match self.nonces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(), // Recover from mutex poisoning
        };

        let window = self.window;
        nonces.retain(|_, seen| now.abs_diff(*seen) <= window);

        if nonces.contains_key(nonce) {
            return false;
        }

        if self.limit.is_some_and(|limit| nonces.len() >= limit) {
            return false;
        }

        nonces.insert(nonce.to_string(), now);

        true
    }

    /// Whether the store holds as many nonces as its limit allows.
    pub fn is_full(&self) -> bool {
        self.limit.is_some_and(|limit| self.len() >= limit)
    }

    /// Get the current number of stored nonces (for monitoring).
    pub fn len(&self) -> usize {
        match self.nonces.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force cleanup of expired nonces.
    pub fn cleanup(&self, now: i64) {
        let mut nonces = match self.nonces.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let window = self.window;
        nonces.retain(|_, seen| now.abs_diff(*seen) <= window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_new_nonce_accepted() {
        let store = NonceStore::new(60);
        assert!(store.check_and_store("nonce1", 1000));
        assert!(store.check_and_store("nonce2", 1000));
    }

    #[test]
    fn test_duplicate_nonce_rejected() {
        let store = NonceStore::new(60);
        assert!(store.check_and_store("nonce1", 1000));
        assert!(!store.check_and_store("nonce1", 1030));
    }

    #[test]
    fn test_nonce_accepted_again_after_window() {
        let store = NonceStore::new(60);
        assert!(store.check_and_store("nonce1", 1000));

        // Still remembered at the edge of the window
        assert!(!store.check_and_store("nonce1", 1060));

        // Pruned once the window has passed
        assert!(store.check_and_store("nonce1", 1061));
    }

    #[test]
    fn test_len_and_cleanup() {
        let store = NonceStore::new(60);
        store.check_and_store("nonce1", 1000);
        store.check_and_store("nonce2", 1050);
        assert_eq!(store.len(), 2);

        store.cleanup(1055);
        assert_eq!(store.len(), 2);

        store.cleanup(1100);
        assert_eq!(store.len(), 1);

        store.cleanup(1200);
        assert!(store.is_empty());
    }

    #[test]
    fn test_limit_refuses_new_nonces_until_expiry() {
        let store = NonceStore::new(60).with_limit(2);
        assert!(store.check_and_store("a", 1000));
        assert!(store.check_and_store("b", 1010));
        assert!(store.is_full());
        assert!(!store.check_and_store("c", 1020));
        assert_eq!(store.len(), 2);

        // "a" expires and frees a slot
        assert!(store.check_and_store("c", 1061));
        assert!(!store.check_and_store("b", 1061));
    }

    #[test]
    fn test_concurrent_checks_accept_once() {
        let store = Arc::new(NonceStore::new(60));
        let accepted: usize = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.check_and_store("shared", 1000))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(accepted, 1);
    }
}
