//! JSON persistence for connection profiles and snippets
//!
//! Both stores keep the whole document in memory and rewrite the file on every
//! mutation (write to a sibling temp file, then rename). A store created with
//! `in_memory()` never touches disk.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::types::{ConnectionProfile, ProfileDraft, ProfileUpdate, Snippet, SnippetDraft};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl serde::Serialize for StorageError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Read-mostly access to connection profiles.
///
/// The session core only ever calls `get`; the remaining operations belong to
/// the UI-facing commands.
pub trait ProfileStore: Send + Sync {
    fn list(&self) -> Vec<ConnectionProfile>;
    fn get(&self, id: &str) -> Option<ConnectionProfile>;
    fn add(&self, draft: ProfileDraft) -> Result<ConnectionProfile, StorageError>;
    fn update(&self, id: &str, update: ProfileUpdate) -> Result<ConnectionProfile, StorageError>;
    fn remove(&self, id: &str) -> Result<bool, StorageError>;
    fn touch(&self, id: &str) -> Result<(), StorageError>;
}

/// Load a JSON array document, creating an empty one if the file is missing
pub(crate) fn load_or_init<T>(path: &Path) -> Result<Vec<T>, StorageError>
where
    T: DeserializeOwned + Serialize,
{
    match std::fs::read_to_string(path) {
        Ok(data) => serde_json::from_str(&data).map_err(|source| StorageError::Json {
            path: path.display().to_string(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("Creating {}", path.display());
            let empty: Vec<T> = Vec::new();
            write_atomic(path, &empty)?;
            Ok(empty)
        }
        Err(source) => Err(StorageError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Pretty-print `value` into `path` via temp file + rename
pub(crate) fn write_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let io_err = |source| StorageError::Io {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }

    let json = serde_json::to_string_pretty(value).map_err(|source| StorageError::Json {
        path: path.display().to_string(),
        source,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// Connection profiles backed by `connections.json`
pub struct ConnectionStorage {
    path: Option<PathBuf>,
    connections: RwLock<Vec<ConnectionProfile>>,
}

impl ConnectionStorage {
    /// Open (or create) the profile file at `path`
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let connections = load_or_init(&path)?;
        info!(
            "Loaded {} connection profiles from {}",
            connections.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path),
            connections: RwLock::new(connections),
        })
    }

    /// Non-persistent store
    pub fn in_memory(connections: Vec<ConnectionProfile>) -> Self {
        Self {
            path: None,
            connections: RwLock::new(connections),
        }
    }

    fn persist(&self, connections: &[ConnectionProfile]) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => write_atomic(path, connections),
            None => Ok(()),
        }
    }
}

impl ProfileStore for ConnectionStorage {
    fn list(&self) -> Vec<ConnectionProfile> {
        self.connections.read().clone()
    }

    fn get(&self, id: &str) -> Option<ConnectionProfile> {
        self.connections.read().iter().find(|c| c.id == id).cloned()
    }

    fn add(&self, draft: ProfileDraft) -> Result<ConnectionProfile, StorageError> {
        let profile = ConnectionProfile::from_draft(draft);
        let mut connections = self.connections.write();
        connections.push(profile.clone());
        self.persist(&connections)?;
        Ok(profile)
    }

    fn update(&self, id: &str, update: ProfileUpdate) -> Result<ConnectionProfile, StorageError> {
        let mut connections = self.connections.write();
        let profile = connections
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        update.apply(profile);
        let updated = profile.clone();
        self.persist(&connections)?;
        Ok(updated)
    }

    fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|c| c.id != id);
        if connections.len() == before {
            return Ok(false);
        }
        self.persist(&connections)?;
        Ok(true)
    }

    fn touch(&self, id: &str) -> Result<(), StorageError> {
        let mut connections = self.connections.write();
        match connections.iter_mut().find(|c| c.id == id) {
            Some(profile) => profile.touch(),
            None => {
                warn!("touch on unknown connection {}", id);
                return Ok(());
            }
        }
        self.persist(&connections)
    }
}

/// Command snippets backed by `snippets.json`
pub struct SnippetStorage {
    path: Option<PathBuf>,
    snippets: RwLock<Vec<Snippet>>,
}

impl SnippetStorage {
    pub fn open(path: PathBuf) -> Result<Self, StorageError> {
        let snippets = load_or_init(&path)?;
        Ok(Self {
            path: Some(path),
            snippets: RwLock::new(snippets),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            snippets: RwLock::new(Vec::new()),
        }
    }

    fn persist(&self, snippets: &[Snippet]) -> Result<(), StorageError> {
        match &self.path {
            Some(path) => write_atomic(path, snippets),
            None => Ok(()),
        }
    }

    pub fn list(&self) -> Vec<Snippet> {
        self.snippets.read().clone()
    }

    pub fn add(&self, draft: SnippetDraft) -> Result<Snippet, StorageError> {
        let snippet = Snippet::from_draft(draft);
        let mut snippets = self.snippets.write();
        snippets.push(snippet.clone());
        self.persist(&snippets)?;
        Ok(snippet)
    }

    /// Replace the snippet with the same id
    pub fn update(&self, snippet: Snippet) -> Result<Snippet, StorageError> {
        let mut snippets = self.snippets.write();
        let slot = snippets
            .iter_mut()
            .find(|s| s.id == snippet.id)
            .ok_or_else(|| StorageError::NotFound(snippet.id.clone()))?;
        *slot = snippet.clone();
        self.persist(&snippets)?;
        Ok(snippet)
    }

    pub fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let mut snippets = self.snippets.write();
        let before = snippets.len();
        snippets.retain(|s| s.id != id);
        if snippets.len() == before {
            return Ok(false);
        }
        self.persist(&snippets)?;
        Ok(true)
    }
}
