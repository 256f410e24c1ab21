//! Credential resolution
//!
//! Turns a stored connection profile (plus an optional secret typed by the
//! user) into everything the transport needs to authenticate. Nothing is
//! cached: every session creation resolves again, so a password changed in the
//! keychain is picked up on the next dial.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use super::error::SshError;
use crate::config::{AuthMethod, ConnectionProfile, CredentialStore};

/// Secret material carried to the transport
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Nothing found; the server decides (normally a rejection)
    None,
    Password(String),
    /// Raw private key file contents
    PrivateKey(Vec<u8>),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Password(_) => write!(f, "Password(***)"),
            Self::PrivateKey(bytes) => write!(f, "PrivateKey({} bytes)", bytes.len()),
        }
    }
}

/// Everything needed to dial and authenticate one SSH link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDescriptor {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl AuthDescriptor {
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

/// Expand a leading `~` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn CredentialStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Resolve `profile` into an [`AuthDescriptor`].
    ///
    /// A non-empty `secret_override` wins over the keychain for password
    /// profiles. Key profiles must name a readable key file.
    pub async fn resolve(
        &self,
        profile: &ConnectionProfile,
        secret_override: Option<&str>,
    ) -> Result<AuthDescriptor, SshError> {
        let credential = match profile.auth_method {
            AuthMethod::Password => self.resolve_password(profile, secret_override).await,
            AuthMethod::Key => {
                let key_path = profile
                    .key_path
                    .as_deref()
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        SshError::InvalidAuthMethod(format!(
                            "connection {} uses key auth but has no key path",
                            profile.id
                        ))
                    })?;
                let path = expand_home(key_path);
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|source| SshError::KeyReadFailure {
                        path: path.display().to_string(),
                        source,
                    })?;
                debug!("Loaded private key {} for {}", path.display(), profile.id);
                Credential::PrivateKey(bytes)
            }
            AuthMethod::Unsupported => {
                return Err(SshError::InvalidAuthMethod(format!(
                    "connection {} has an unsupported auth method",
                    profile.id
                )))
            }
        };

        Ok(AuthDescriptor {
            host: profile.host.clone(),
            port: profile.port,
            username: profile.username.clone(),
            credential,
        })
    }

    async fn resolve_password(
        &self,
        profile: &ConnectionProfile,
        secret_override: Option<&str>,
    ) -> Credential {
        if let Some(secret) = secret_override.filter(|s| !s.is_empty()) {
            return Credential::Password(secret.to_string());
        }

        // Keychain backends block (D-Bus, keyutils, Security.framework)
        let store = Arc::clone(&self.store);
        let id = profile.id.clone();
        let lookup = tokio::task::spawn_blocking(move || store.get(&id)).await;

        match lookup {
            Ok(Ok(Some(secret))) => Credential::Password(secret),
            Ok(Ok(None)) => {
                debug!("No stored password for {}", profile.id);
                Credential::None
            }
            Ok(Err(e)) => {
                warn!("Keychain lookup failed for {}: {}", profile.id, e);
                Credential::None
            }
            Err(e) => {
                warn!("Keychain lookup for {} did not finish: {}", profile.id, e);
                Credential::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryCredentialStore, ProfileDraft};
    use tempfile::TempDir;

    fn profile(auth_method: AuthMethod, key_path: Option<String>) -> ConnectionProfile {
        ConnectionProfile::from_draft(ProfileDraft {
            name: "web".into(),
            host: "10.0.0.5".into(),
            port: Some(2222),
            username: "deploy".into(),
            auth_method,
            key_path,
            services: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_override_skips_store() {
        let store = Arc::new(MemoryCredentialStore::new());
        let p = profile(AuthMethod::Password, None);
        store.set(&p.id, "stored").unwrap();

        let resolver = CredentialResolver::new(store.clone());
        let auth = resolver.resolve(&p, Some("typed")).await.unwrap();

        assert_eq!(auth.credential, Credential::Password("typed".into()));
        assert_eq!(auth.port, 2222);
        assert_eq!(store.lookups(), 0);
    }

    #[tokio::test]
    async fn test_empty_override_uses_store() {
        let store = Arc::new(MemoryCredentialStore::new());
        let p = profile(AuthMethod::Password, None);
        store.set(&p.id, "stored").unwrap();

        let resolver = CredentialResolver::new(store.clone());
        let auth = resolver.resolve(&p, Some("")).await.unwrap();

        assert_eq!(auth.credential, Credential::Password("stored".into()));
        assert_eq!(store.lookups(), 1);
    }

    struct SlowStore;

    impl CredentialStore for SlowStore {
        fn get(&self, _: &str) -> Result<Option<String>, crate::config::KeychainError> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            Ok(Some("slow".into()))
        }
        fn set(&self, _: &str, _: &str) -> Result<(), crate::config::KeychainError> {
            Ok(())
        }
        fn delete(&self, _: &str) -> Result<(), crate::config::KeychainError> {
            Ok(())
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_keychain_lookup_leaves_runtime_free() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let resolver = CredentialResolver::new(Arc::new(SlowStore));
        let auth = resolver
            .resolve(&profile(AuthMethod::Password, None), None)
            .await
            .unwrap();

        assert_eq!(auth.credential, Credential::Password("slow".into()));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_missing_password_is_deferred() {
        let resolver = CredentialResolver::new(Arc::new(MemoryCredentialStore::new()));
        let auth = resolver
            .resolve(&profile(AuthMethod::Password, None), None)
            .await
            .unwrap();
        assert_eq!(auth.credential, Credential::None);
    }

    #[tokio::test]
    async fn test_key_read() {
        let dir = TempDir::new().unwrap();
        let key = dir.path().join("id_ed25519");
        std::fs::write(&key, b"KEY MATERIAL").unwrap();

        let resolver = CredentialResolver::new(Arc::new(MemoryCredentialStore::new()));
        let auth = resolver
            .resolve(
                &profile(AuthMethod::Key, Some(key.display().to_string())),
                None,
            )
            .await
            .unwrap();
        assert_eq!(auth.credential, Credential::PrivateKey(b"KEY MATERIAL".to_vec()));
    }

    #[tokio::test]
    async fn test_unreadable_key() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");

        let resolver = CredentialResolver::new(Arc::new(MemoryCredentialStore::new()));
        let err = resolver
            .resolve(
                &profile(AuthMethod::Key, Some(missing.display().to_string())),
                None,
            )
            .await
            .unwrap_err();

        match err {
            SshError::KeyReadFailure { path, source } => {
                assert!(path.ends_with("nope"));
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_key_without_path() {
        let resolver = CredentialResolver::new(Arc::new(MemoryCredentialStore::new()));
        let err = resolver
            .resolve(&profile(AuthMethod::Key, None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::InvalidAuthMethod(_)));

        let err = resolver
            .resolve(&profile(AuthMethod::Unsupported, None), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SshError::InvalidAuthMethod(_)));
    }

    #[test]
    fn test_credential_debug_redacts() {
        let rendered = format!("{:?}", Credential::Password("hunter2".into()));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/key"), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.ssh/id"), home.join(".ssh/id"));
        }
    }
}
