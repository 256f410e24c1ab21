//! Application settings (`settings.json`)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::storage::{write_atomic, StorageError};

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "SSM_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Metrics polling interval
    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,

    /// TCP connect + handshake timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// SSH keepalive interval
    #[serde(default = "default_keepalive_interval_secs")]
    pub keepalive_interval_secs: u64,

    /// Fallback filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_metrics_interval_ms() -> u64 {
    5000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_keepalive_interval_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            metrics_interval_ms: default_metrics_interval_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            keepalive_interval_secs: default_keepalive_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl AppSettings {
    /// Load settings, writing defaults back if the file is missing.
    ///
    /// An unparseable file is reported and replaced by defaults in memory only,
    /// so a hand-edited typo never blocks startup.
    pub fn load_or_init(path: &Path) -> Result<Self, StorageError> {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(settings) => Ok(settings),
                Err(e) => {
                    warn!("Ignoring invalid {}: {}", path.display(), e);
                    Ok(Self::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let settings = Self::default();
                write_atomic(path, &settings)?;
                Ok(settings)
            }
            Err(source) => Err(StorageError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }
}

/// Root directory for profiles, snippets, settings and logs
pub fn data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ssm")
}
