//! Configuration Management Module
//!
//! Handles persistent storage of connection profiles and snippets, application
//! settings, and secure credential storage via the system keychain.
//!
//! Credential storage:
//! - SSH passwords: `ssm` keychain service, one entry per connection id

pub mod keychain;
pub mod settings;
pub mod storage;
pub mod types;

pub use keychain::{CredentialStore, Keychain, KeychainError, MemoryCredentialStore};
pub use settings::{data_dir, AppSettings};
pub use storage::{ConnectionStorage, ProfileStore, SnippetStorage, StorageError};
pub use types::{AuthMethod, ConnectionProfile, ProfileDraft, ProfileUpdate, Snippet, SnippetDraft};
