//! Transport seam
//!
//! The registry, poller and façade only talk to these traits. The russh-backed
//! implementation lives in [`super::client`]; tests plug in an in-process fake.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use super::auth::AuthDescriptor;
use super::error::SshError;
use super::shell::{PtySize, ShellChannel};
use crate::sftp::RemoteFs;

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Dials and authenticates SSH links
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, auth: &AuthDescriptor) -> Result<Arc<dyn RemoteSession>, SshError>;
}

/// One authenticated SSH link
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run `command`; only exit status 0 counts as success
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError>;

    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>, SshError>;

    async fn open_shell(&self, size: PtySize) -> Result<ShellChannel, SshError>;

    /// Disconnect; safe to call repeatedly
    async fn end(&self);

    fn is_closed(&self) -> bool;

    /// Flips to `true` once the link is gone, whoever closed it
    fn subscribe_disconnect(&self) -> watch::Receiver<bool>;
}

/// Resolve once `rx` reports a closed link (or its sender is dropped)
pub async fn wait_closed(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
