//! SSH error types

use thiserror::Error;

/// Errors raised while resolving credentials, dialing or running commands
#[derive(Debug, Error)]
pub enum SshError {
    #[error("Invalid authentication method: {0}")]
    InvalidAuthMethod(String),

    #[error("Failed to read private key {path}: {source}")]
    KeyReadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection failed: {0}")]
    DialFailure(String),

    #[error("Command exited with code {exit_code}: {stderr}")]
    CommandFailure {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Session disconnected")]
    Disconnected,
}

impl SshError {
    /// Structured detail for the IPC `data` field
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            Self::CommandFailure {
                exit_code,
                stdout,
                stderr,
            } => Some(serde_json::json!({
                "exitCode": exit_code,
                "stdout": stdout,
                "stderr": stderr,
            })),
            _ => None,
        }
    }
}

impl From<russh::Error> for SshError {
    fn from(e: russh::Error) -> Self {
        match e {
            russh::Error::Disconnect | russh::Error::SendError => Self::Disconnected,
            other => Self::Channel(other.to_string()),
        }
    }
}

impl serde::Serialize for SshError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failure_detail() {
        let err = SshError::CommandFailure {
            exit_code: 3,
            stdout: "partial".into(),
            stderr: "boom".into(),
        };
        assert_eq!(err.to_string(), "Command exited with code 3: boom");
        let detail = err.detail().unwrap();
        assert_eq!(detail["exitCode"], 3);
        assert_eq!(detail["stderr"], "boom");

        assert!(SshError::Disconnected.detail().is_none());
    }
}
