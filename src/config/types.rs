//! Configuration Types
//!
//! Data structures for saved connection profiles and command snippets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authentication method for a connection profile
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Password stored in the system keychain
    Password,
    /// Private key file on local disk
    #[default]
    Key,
    /// Anything else found in a profile file; rejected at resolution time
    #[serde(other)]
    Unsupported,
}

/// A saved connection profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    /// Unique identifier, generated once
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// SSH host
    pub host: String,

    /// SSH port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,

    /// SSH username
    #[serde(alias = "user")]
    pub username: String,

    /// Authentication method
    #[serde(default)]
    pub auth_method: AuthMethod,

    /// Path to private key file (key auth only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,

    /// Service names watched by the metrics poller
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,

    /// Last successful contact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

fn default_port() -> u16 {
    22
}

impl ConnectionProfile {
    /// Build a profile with a freshly generated id
    pub fn from_draft(draft: ProfileDraft) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            host: draft.host,
            port: draft.port.unwrap_or_else(default_port),
            username: draft.username,
            auth_method: draft.auth_method,
            key_path: draft.key_path,
            services: draft.services,
            last_seen: None,
        }
    }

    /// Update last seen timestamp
    pub fn touch(&mut self) {
        self.last_seen = Some(Utc::now());
    }

    /// Get display string (user@host:port)
    pub fn display_string(&self) -> String {
        if self.port == 22 {
            format!("{}@{}", self.username, self.host)
        } else {
            format!("{}@{}:{}", self.username, self.host, self.port)
        }
    }
}

/// Profile data as submitted by the UI, before an id is assigned
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileDraft {
    #[serde(default)]
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(alias = "user")]
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub services: Vec<String>,
}

/// Partial update; absent fields keep their stored value
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(alias = "user")]
    pub username: Option<String>,
    pub auth_method: Option<AuthMethod>,
    pub key_path: Option<String>,
    pub services: Option<Vec<String>>,
}

impl ProfileUpdate {
    pub fn apply(self, profile: &mut ConnectionProfile) {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(host) = self.host {
            profile.host = host;
        }
        if let Some(port) = self.port {
            profile.port = port;
        }
        if let Some(username) = self.username {
            profile.username = username;
        }
        if let Some(auth_method) = self.auth_method {
            profile.auth_method = auth_method;
        }
        if let Some(key_path) = self.key_path {
            profile.key_path = Some(key_path);
        }
        if let Some(services) = self.services {
            profile.services = services;
        }
    }
}

/// A reusable shell command
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snippet {
    pub id: String,
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnippetDraft {
    pub name: String,
    pub command: String,
}

impl Snippet {
    pub fn from_draft(draft: SnippetDraft) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            command: draft.command,
        }
    }
}
