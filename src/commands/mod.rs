//! Command façade
//!
//! One function per user-facing operation. Each asks the registry for the
//! session it needs and issues a single remote call; none of them ever closes
//! a session except through the registry.

pub mod connections;
pub mod exec;
pub mod metrics;
pub mod session;
pub mod sftp;
pub mod snippets;
pub mod terminal;

use thiserror::Error;

use crate::config::{KeychainError, StorageError};
use crate::session::SessionError;
use crate::sftp::SftpError;
use crate::ssh::SshError;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Sftp(#[from] SftpError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Keychain(#[from] KeychainError),

    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("Invalid PID: {0}")]
    InvalidPid(String),

    #[error("Terminal not found: {0}")]
    TerminalNotFound(String),
}

impl CommandError {
    fn ssh(&self) -> Option<&SshError> {
        match self {
            Self::Ssh(e) | Self::Session(SessionError::Ssh(e)) => Some(e),
            _ => None,
        }
    }

    /// Structured detail (exit code, stdout, stderr) for failed commands
    pub fn detail(&self) -> Option<serde_json::Value> {
        self.ssh().and_then(SshError::detail)
    }
}

impl serde::Serialize for CommandError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type CommandResult<T> = Result<T, CommandError>;
