//! Session registry errors

use thiserror::Error;

use super::registry::SessionKind;
use crate::sftp::SftpError;
use crate::ssh::SshError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Sftp(#[from] SftpError),

    #[error("Session is {actual}, expected {expected}")]
    WrongKind {
        expected: SessionKind,
        actual: SessionKind,
    },
}

impl serde::Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
