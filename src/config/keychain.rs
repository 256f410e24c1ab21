//! Credential storage
//!
//! Passwords live in the OS keychain, one entry per connection id under the
//! `ssm` service. The session core only reads; the UI writes when a profile is
//! saved and deletes when it is removed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

/// Keychain service name
pub const KEYCHAIN_SERVICE: &str = "ssm";

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),
}

impl serde::Serialize for KeychainError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Secret lookup keyed by connection id
pub trait CredentialStore: Send + Sync {
    fn get(&self, connection_id: &str) -> Result<Option<String>, KeychainError>;
    fn set(&self, connection_id: &str, secret: &str) -> Result<(), KeychainError>;
    fn delete(&self, connection_id: &str) -> Result<(), KeychainError>;
}

/// System keychain (macOS Keychain, Windows Credential Manager, Linux keyutils)
pub struct Keychain {
    service: String,
}

impl Keychain {
    pub fn new() -> Self {
        Self::with_service(KEYCHAIN_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, connection_id: &str) -> Result<keyring::Entry, KeychainError> {
        Ok(keyring::Entry::new(&self.service, connection_id)?)
    }
}

impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for Keychain {
    fn get(&self, connection_id: &str) -> Result<Option<String>, KeychainError> {
        match self.entry(connection_id)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, connection_id: &str, secret: &str) -> Result<(), KeychainError> {
        self.entry(connection_id)?.set_password(secret)?;
        Ok(())
    }

    fn delete(&self, connection_id: &str) -> Result<(), KeychainError> {
        match self.entry(connection_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store, used in tests and when no keychain is available
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: RwLock<HashMap<String, String>>,
    lookups: AtomicUsize,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `get` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, connection_id: &str) -> Result<Option<String>, KeychainError> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self.secrets.read().get(connection_id).cloned())
    }

    fn set(&self, connection_id: &str, secret: &str) -> Result<(), KeychainError> {
        self.secrets
            .write()
            .insert(connection_id.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, connection_id: &str) -> Result<(), KeychainError> {
        self.secrets.write().remove(connection_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.get("c1").unwrap(), None);

        store.set("c1", "hunter2").unwrap();
        assert_eq!(store.get("c1").unwrap().as_deref(), Some("hunter2"));

        store.delete("c1").unwrap();
        store.delete("c1").unwrap();
        assert_eq!(store.get("c1").unwrap(), None);
        assert_eq!(store.lookups(), 3);
    }
}
