//! SFTP error types

use russh_sftp::client::error::Error as ClientError;
use russh_sftp::protocol::StatusCode;
use thiserror::Error;

/// SFTP-specific errors
#[derive(Debug, Error)]
pub enum SftpError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid {encoding} content: {message}")]
    InvalidEncoding { encoding: String, message: String },
}

impl SftpError {
    /// Map a russh-sftp failure on `path` to a transfer error kind
    pub fn from_remote(err: ClientError, path: &str) -> Self {
        match err {
            ClientError::Status(status) => match status.status_code {
                StatusCode::NoSuchFile => Self::FileNotFound(path.to_string()),
                StatusCode::PermissionDenied => Self::PermissionDenied(path.to_string()),
                StatusCode::NoConnection | StatusCode::ConnectionLost => {
                    Self::ChannelError(status.error_message)
                }
                _ => Self::ProtocolError(format!("{}: {}", path, status.error_message)),
            },
            ClientError::IO(message) => Self::ChannelError(message),
            other => Self::ProtocolError(format!("{}: {}", path, other)),
        }
    }
}

impl serde::Serialize for SftpError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
