//! Interactive shell plumbing
//!
//! A shell is driven through one ordered input queue (keystrokes, resizes,
//! close) and produces one ordered output stream with stdout and stderr merged.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::SshError;

/// Queue depth for shell input
pub const SHELL_INPUT_CAPACITY: usize = 256;

/// Terminal dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtySize {
    pub rows: u32,
    pub cols: u32,
}

impl Default for PtySize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

#[derive(Debug)]
pub enum ShellInput {
    Data(Vec<u8>),
    Resize(PtySize),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Data(Vec<u8>),
    Exit { exit_status: Option<u32> },
}

/// Both ends of a freshly opened shell
pub struct ShellChannel {
    pub input: mpsc::Sender<ShellInput>,
    pub output: mpsc::Receiver<ShellEvent>,
}

/// Cloneable input side of a shell
#[derive(Debug, Clone)]
pub struct ShellWriter {
    input: mpsc::Sender<ShellInput>,
}

impl ShellWriter {
    pub fn new(input: mpsc::Sender<ShellInput>) -> Self {
        Self { input }
    }

    pub async fn write(&self, data: Vec<u8>) -> Result<(), SshError> {
        self.send(ShellInput::Data(data)).await
    }

    pub async fn resize(&self, size: PtySize) -> Result<(), SshError> {
        self.send(ShellInput::Resize(size)).await
    }

    /// Ask the IO task to close the channel; a no-op once it has exited
    pub async fn close(&self) {
        let _ = self.input.send(ShellInput::Close).await;
    }

    async fn send(&self, msg: ShellInput) -> Result<(), SshError> {
        self.input
            .send(msg)
            .await
            .map_err(|_| SshError::Disconnected)
    }
}
