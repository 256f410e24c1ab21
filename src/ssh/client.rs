//! russh-backed transport
//!
//! Each [`RusshSession`] owns one authenticated SSH connection. Disconnects are
//! observed through the client handler: russh drops the handler when the
//! connection task ends, and the handler's `Drop` flips the session's watch
//! channel so the registry can evict the handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{ChannelMsg, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::auth::{AuthDescriptor, Credential};
use super::error::SshError;
use super::shell::{PtySize, ShellChannel, ShellEvent, ShellInput, SHELL_INPUT_CAPACITY};
use super::transport::{Connector, ExecOutput, RemoteSession};
use crate::sftp::{RemoteFs, SftpFs};

/// Queue depth for shell output
const SHELL_OUTPUT_CAPACITY: usize = 1024;

const TERM: &str = "xterm-256color";

pub struct ClientHandler {
    closed_tx: watch::Sender<bool>,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host keys are not pinned; profiles carry no known_hosts data
        Ok(true)
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        self.closed_tx.send_replace(true);
    }
}

/// Dials real SSH servers
#[derive(Debug, Clone)]
pub struct RusshConnector {
    connect_timeout: Duration,
    keepalive: Duration,
}

impl RusshConnector {
    pub fn new(connect_timeout: Duration, keepalive: Duration) -> Self {
        Self {
            connect_timeout,
            keepalive,
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, auth: &AuthDescriptor) -> Result<Arc<dyn RemoteSession>, SshError> {
        let target = auth.target();
        let config = Arc::new(client::Config {
            keepalive_interval: Some(self.keepalive),
            ..Default::default()
        });

        let (closed_tx, closed_rx) = watch::channel(false);
        let handler = ClientHandler { closed_tx };

        debug!("Dialing {}", target);
        let mut handle = tokio::time::timeout(
            self.connect_timeout,
            client::connect(config, (auth.host.as_str(), auth.port), handler),
        )
        .await
        .map_err(|_| {
            SshError::DialFailure(format!(
                "{}: timed out after {}s",
                target,
                self.connect_timeout.as_secs()
            ))
        })?
        .map_err(|e| SshError::DialFailure(format!("{}: {}", target, e)))?;

        authenticate(&mut handle, auth).await?;
        info!("Connected to {}", target);

        Ok(Arc::new(RusshSession {
            handle,
            closed_rx,
            ended: AtomicBool::new(false),
        }))
    }
}

async fn authenticate(handle: &mut Handle<ClientHandler>, auth: &AuthDescriptor) -> Result<(), SshError> {
    let username = auth.username.clone();
    let result = match &auth.credential {
        Credential::Password(password) => handle.authenticate_password(username, password.clone()).await,
        Credential::None => handle.authenticate_none(username).await,
        Credential::PrivateKey(bytes) => {
            let pem = std::str::from_utf8(bytes)
                .map_err(|_| SshError::DialFailure("Private key is not valid UTF-8".to_string()))?;
            let key = russh::keys::decode_secret_key(pem, None)
                .map_err(|e| SshError::DialFailure(format!("Failed to parse private key: {}", e)))?;
            let hash_alg = handle
                .best_supported_rsa_hash()
                .await
                .map_err(|e| SshError::DialFailure(e.to_string()))?
                .flatten();
            handle
                .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                .await
        }
    }
    .map_err(|e| SshError::DialFailure(format!("Authentication error: {}", e)))?;

    if !result.success() {
        return Err(SshError::DialFailure(format!(
            "Authentication rejected for {}",
            auth.target()
        )));
    }
    Ok(())
}

pub struct RusshSession {
    handle: Handle<ClientHandler>,
    closed_rx: watch::Receiver<bool>,
    ended: AtomicBool,
}

#[async_trait]
impl RemoteSession for RusshSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        // Exit status may arrive after EOF, so drain until close
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.extend_from_slice(&data),
                ChannelMsg::ExtendedData { data, ext: 1 } => stderr.extend_from_slice(&data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status as i32),
                ChannelMsg::Close => break,
                _ => {}
            }
        }

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        match exit_code.unwrap_or(-1) {
            0 => Ok(ExecOutput { stdout, stderr }),
            exit_code => Err(SshError::CommandFailure {
                exit_code,
                stdout,
                stderr,
            }),
        }
    }

    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>, SshError> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| SshError::Channel(format!("SFTP subsystem: {}", e)))?;
        Ok(Arc::new(SftpFs::new(sftp)))
    }

    async fn open_shell(&self, size: PtySize) -> Result<ShellChannel, SshError> {
        let mut channel = self.handle.channel_open_session().await?;
        channel
            .request_pty(false, TERM, size.cols, size.rows, 0, 0, &[])
            .await?;
        channel.request_shell(true).await?;

        let (input_tx, mut input_rx) = mpsc::channel::<ShellInput>(SHELL_INPUT_CAPACITY);
        let (output_tx, output_rx) = mpsc::channel::<ShellEvent>(SHELL_OUTPUT_CAPACITY);

        tokio::spawn(async move {
            let mut exit_status = None;

            loop {
                tokio::select! {
                    input = input_rx.recv() => {
                        match input {
                            Some(ShellInput::Data(bytes)) => {
                                if channel.data(&bytes[..]).await.is_err() {
                                    warn!("[shell] write failed, channel closed");
                                    break;
                                }
                            }
                            Some(ShellInput::Resize(size)) => {
                                if let Err(e) = channel.window_change(size.cols, size.rows, 0, 0).await {
                                    debug!("[shell] resize failed: {}", e);
                                }
                            }
                            Some(ShellInput::Close) | None => {
                                let _ = channel.eof().await;
                                let _ = channel.close().await;
                                break;
                            }
                        }
                    }
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                                if output_tx.send(ShellEvent::Data(data.to_vec())).await.is_err() {
                                    break;
                                }
                            }
                            Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                                exit_status = Some(status);
                            }
                            Some(ChannelMsg::Close) | None => break,
                            _ => {}
                        }
                    }
                }
            }

            let _ = output_tx.send(ShellEvent::Exit { exit_status }).await;
            debug!("[shell] IO task ended");
        });

        Ok(ShellChannel {
            input: input_tx,
            output: output_rx,
        })
    }

    async fn end(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("Disconnect: {}", e);
        }
    }

    fn is_closed(&self) -> bool {
        self.ended.load(Ordering::SeqCst) || self.handle.is_closed() || *self.closed_rx.borrow()
    }

    fn subscribe_disconnect(&self) -> watch::Receiver<bool> {
        self.closed_rx.clone()
    }
}
