//! Per-client secret key lookup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::RwLock;

use crate::error::{AuthErrorKind, RpcError};

/// Read-only view of the client key table.
///
/// An empty secret counts as no key.
pub trait KeyStore: Send + Sync {
    fn secret(&self, client: &str) -> Option<Vec<u8>>;
}

impl KeyStore for HashMap<String, Vec<u8>> {
    fn secret(&self, client: &str) -> Option<Vec<u8>> {
        self.get(client).filter(|key| !key.is_empty()).cloned()
    }
}

impl KeyStore for HashMap<String, String> {
    fn secret(&self, client: &str) -> Option<Vec<u8>> {
        self.get(client)
            .filter(|key| !key.is_empty())
            .map(|key| key.as_bytes().to_vec())
    }
}

/// Key table that an outside owner can replace while the server runs.
#[derive(Debug, Default)]
pub struct SharedKeyStore {
    keys: RwLock<HashMap<String, Vec<u8>>>,
}

impl SharedKeyStore {
    pub fn new(keys: HashMap<String, Vec<u8>>) -> Self {
        Self {
            keys: RwLock::new(keys),
        }
    }

    /// Swap in a whole new key table.
    pub fn replace(&self, keys: HashMap<String, Vec<u8>>) {
        *self.keys.write().unwrap_or_else(|e| e.into_inner()) = keys;
    }

    pub fn insert(&self, client: impl Into<String>, secret: impl Into<Vec<u8>>) {
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client.into(), secret.into());
    }

    pub fn remove(&self, client: &str) -> bool {
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(client)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.keys.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyStore for SharedKeyStore {
    fn secret(&self, client: &str) -> Option<Vec<u8>> {
        self.keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .secret(client)
    }
}

/// Load a client key table from a TOML file of `client = "secret"` pairs.
///
/// Security: Verifies the file has restrictive permissions (0600 or 0400)
/// before loading to prevent secrets from being readable by other users.
pub fn load_keys_file(path: &Path) -> Result<HashMap<String, Vec<u8>>, RpcError> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        key_error(format!(
            "Failed to read key file metadata from {}: {}",
            path.display(),
            e
        ))
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode();
        // Check that group and world bits are all zero (only owner can access)
        if mode & 0o077 != 0 {
            return Err(key_error(format!(
                "Key file {} has insecure permissions {:04o}, expected 0600 or 0400",
                path.display(),
                mode & 0o777
            )));
        }
    }
    #[cfg(not(unix))]
    let _ = metadata;

    let content = std::fs::read_to_string(path).map_err(|e| {
        key_error(format!("Failed to read key file {}: {}", path.display(), e))
    })?;

    let table: HashMap<String, String> = toml::from_str(&content).map_err(|e| {
        key_error(format!("Failed to parse key file {}: {}", path.display(), e))
    })?;

    if let Some((client, _)) = table.iter().find(|(_, secret)| secret.is_empty()) {
        return Err(key_error(format!(
            "Key file {} has an empty secret for client '{}'",
            path.display(),
            client
        )));
    }

    Ok(table
        .into_iter()
        .map(|(client, secret)| (client, secret.into_bytes()))
        .collect())
}

fn key_error(message: String) -> RpcError {
    RpcError::Auth {
        kind: AuthErrorKind::KeyStoreError { message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_secret_is_no_key() {
        let mut keys: HashMap<String, Vec<u8>> = HashMap::new();
        keys.insert("alice".to_string(), b"k".to_vec());
        keys.insert("bob".to_string(), Vec::new());
        assert_eq!(keys.secret("alice"), Some(b"k".to_vec()));
        assert_eq!(keys.secret("bob"), None);
        assert_eq!(keys.secret("carol"), None);
    }

    #[test]
    fn test_shared_store_replace() {
        let store = SharedKeyStore::default();
        store.insert("alice", "one");
        assert_eq!(store.secret("alice"), Some(b"one".to_vec()));

        let mut fresh = HashMap::new();
        fresh.insert("bob".to_string(), b"two".to_vec());
        store.replace(fresh);
        assert_eq!(store.secret("alice"), None);
        assert_eq!(store.len(), 1);
        assert!(store.remove("bob"));
        assert!(store.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_load_keys_file_checks_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.toml");
        std::fs::write(&path, "alice = \"secret-a\"\nbob = \"secret-b\"\n").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(matches!(
            load_keys_file(&path),
            Err(RpcError::Auth {
                kind: AuthErrorKind::KeyStoreError { .. }
            })
        ));

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        let keys = load_keys_file(&path).unwrap();
        assert_eq!(keys.get("bob"), Some(&b"secret-b".to_vec()));
    }
}
