//! SFTP data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One remote directory entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub name: String,
    pub is_directory: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub size: u64,
    /// Modification time, if the server reported one
    pub modified: Option<DateTime<Utc>>,
    /// Unix mode bits
    pub permissions: Option<u32>,
}

/// How file contents cross the IPC boundary
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Text; invalid UTF-8 is replaced on read
    #[default]
    Utf8,
    Base64,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Base64 => "base64",
        }
    }
}
