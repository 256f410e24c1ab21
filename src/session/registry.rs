//! Session Registry
//!
//! Owns every live remote session, keyed by (connection id, kind, terminal id):
//!
//! - at most one exec and one file-transfer session per connection
//! - any number of shells per connection, one per terminal id
//!
//! Creation is serialized per key: each key maps to a slot guarded by an async
//! mutex that is held across profile lookup, credential resolution and the
//! dial. Concurrent callers for the same key wait on the slot and then reuse
//! the handle the first caller stored. Different keys never contend.
//!
//! Liveness is tracked per handle. A watcher task waits on the transport's
//! disconnect signal, marks the handle closed and evicts it from its slot, so
//! the next `get_or_create` dials fresh.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::state::{CloseReason, HandleLifecycle, HandleState};
use crate::config::ProfileStore;
use crate::sftp::RemoteFs;
use crate::ssh::{
    wait_closed, Connector, CredentialResolver, ExecOutput, PtySize, RemoteSession, ShellEvent,
    ShellWriter,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Exec,
    FileTransfer,
    Shell,
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec => write!(f, "exec"),
            Self::FileTransfer => write!(f, "file_transfer"),
            Self::Shell => write!(f, "shell"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub connection_id: String,
    pub kind: SessionKind,
    /// Set for shells only
    pub terminal_id: Option<String>,
}

impl SessionKey {
    pub fn exec(connection_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            kind: SessionKind::Exec,
            terminal_id: None,
        }
    }

    pub fn file_transfer(connection_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            kind: SessionKind::FileTransfer,
            terminal_id: None,
        }
    }

    pub fn shell(connection_id: &str, terminal_id: &str) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            kind: SessionKind::Shell,
            terminal_id: Some(terminal_id.to_string()),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.terminal_id {
            Some(tid) => write!(f, "{}/{}/{}", self.connection_id, self.kind, tid),
            None => write!(f, "{}/{}", self.connection_id, self.kind),
        }
    }
}

/// What to open when no live session exists for the key
pub enum SessionRequest {
    Exec,
    FileTransfer,
    Shell {
        terminal_id: String,
        size: PtySize,
        /// Receives shell output and the final exit event, in order
        sink: mpsc::UnboundedSender<ShellEvent>,
    },
}

impl SessionRequest {
    fn key(&self, connection_id: &str) -> SessionKey {
        match self {
            Self::Exec => SessionKey::exec(connection_id),
            Self::FileTransfer => SessionKey::file_transfer(connection_id),
            Self::Shell { terminal_id, .. } => SessionKey::shell(connection_id, terminal_id),
        }
    }
}

enum Capability {
    Exec,
    FileTransfer(Arc<dyn RemoteFs>),
    Shell(ShellWriter),
}

struct HandleInner {
    id: u64,
    key: SessionKey,
    session: Arc<dyn RemoteSession>,
    capability: Capability,
    lifecycle: Mutex<HandleLifecycle>,
}

/// Shared reference to a registry-owned session.
///
/// Callers may clone and use it freely but never end it; only the registry
/// closes sessions.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionHandle {
    fn new(id: u64, key: SessionKey, session: Arc<dyn RemoteSession>, capability: Capability) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                key,
                session,
                capability,
                lifecycle: Mutex::new(HandleLifecycle::new()),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.inner.key
    }

    pub fn kind(&self) -> SessionKind {
        self.inner.key.kind
    }

    pub fn state(&self) -> HandleState {
        self.inner.lifecycle.lock().state()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.lifecycle.lock().close_reason()
    }

    pub fn is_live(&self) -> bool {
        self.inner.lifecycle.lock().is_live() && !self.inner.session.is_closed()
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(crate::ssh::SshError::Disconnected.into())
        }
    }

    fn wrong_kind(&self, expected: SessionKind) -> SessionError {
        SessionError::WrongKind {
            expected,
            actual: self.kind(),
        }
    }

    /// Run a command on an exec session
    pub async fn exec(&self, command: &str) -> Result<ExecOutput, SessionError> {
        if !matches!(self.inner.capability, Capability::Exec) {
            return Err(self.wrong_kind(SessionKind::Exec));
        }
        self.ensure_live()?;
        Ok(self.inner.session.exec(command).await?)
    }

    /// File operations of a file-transfer session
    pub fn fs(&self) -> Result<Arc<dyn RemoteFs>, SessionError> {
        match &self.inner.capability {
            Capability::FileTransfer(fs) => {
                self.ensure_live()?;
                Ok(Arc::clone(fs))
            }
            _ => Err(self.wrong_kind(SessionKind::FileTransfer)),
        }
    }

    /// Input side of a shell session
    pub fn shell(&self) -> Result<ShellWriter, SessionError> {
        match &self.inner.capability {
            Capability::Shell(writer) => {
                self.ensure_live()?;
                Ok(writer.clone())
            }
            _ => Err(self.wrong_kind(SessionKind::Shell)),
        }
    }

    /// Mark closed and tear down the capability and transport
    pub(crate) async fn end(&self, reason: CloseReason) {
        let first = self.inner.lifecycle.lock().close(reason);
        if first {
            match &self.inner.capability {
                Capability::Exec => {}
                Capability::FileTransfer(fs) => fs.close().await,
                Capability::Shell(writer) => writer.close().await,
            }
            debug!("[registry] ended {} ({})", self.inner.key, reason);
        }
        self.inner.session.end().await;
    }
}

type Slot = Arc<tokio::sync::Mutex<Option<SessionHandle>>>;

pub struct SessionRegistry {
    slots: Arc<DashMap<SessionKey, Slot>>,
    profiles: Arc<dyn ProfileStore>,
    resolver: CredentialResolver,
    connector: Arc<dyn Connector>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(
        profiles: Arc<dyn ProfileStore>,
        resolver: CredentialResolver,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            profiles,
            resolver,
            connector,
            next_id: AtomicU64::new(1),
        }
    }

    /// Return the live session for the request's key, creating it if needed
    pub async fn get_or_create(
        &self,
        connection_id: &str,
        request: SessionRequest,
    ) -> Result<SessionHandle, SessionError> {
        let key = request.key(connection_id);

        loop {
            let slot: Slot = self.slots.entry(key.clone()).or_default().clone();
            let mut guard = slot.lock().await;

            // A close may have detached this slot while we waited for it
            let current = self
                .slots
                .get(&key)
                .map(|s| Arc::ptr_eq(s.value(), &slot))
                .unwrap_or(false);
            if !current {
                continue;
            }

            if let Some(handle) = guard.as_ref() {
                if handle.is_live() {
                    return Ok(handle.clone());
                }
                debug!("[registry] discarding closed handle {}", key);
                if let Some(stale) = guard.take() {
                    stale.end(CloseReason::RemoteDisconnect).await;
                }
            }

            let handle = match self.create(key.clone(), request).await {
                Ok(handle) => handle,
                Err(e) => {
                    self.slots.remove_if(&key, |_, s| Arc::ptr_eq(s, &slot));
                    warn!("[registry] failed to open {}: {}", key, e);
                    return Err(e);
                }
            };
            *guard = Some(handle.clone());
            drop(guard);

            self.watch_liveness(slot, handle.clone());
            return Ok(handle);
        }
    }

    /// Live handle for `key`, without creating one
    pub async fn get(&self, key: &SessionKey) -> Option<SessionHandle> {
        let slot: Slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock().await;
        guard.as_ref().filter(|h| h.is_live()).cloned()
    }

    /// Shorthand for the connection's exec session
    pub async fn exec_session(&self, connection_id: &str) -> Result<SessionHandle, SessionError> {
        self.get_or_create(connection_id, SessionRequest::Exec).await
    }

    /// Shorthand for the connection's file-transfer session
    pub async fn file_session(&self, connection_id: &str) -> Result<SessionHandle, SessionError> {
        self.get_or_create(connection_id, SessionRequest::FileTransfer)
            .await
    }

    async fn create(&self, key: SessionKey, request: SessionRequest) -> Result<SessionHandle, SessionError> {
        let profile = self
            .profiles
            .get(&key.connection_id)
            .ok_or_else(|| SessionError::SessionNotFound(key.connection_id.clone()))?;

        let auth = self.resolver.resolve(&profile, None).await?;
        info!(
            "[registry] opening {} session to {}",
            key.kind,
            profile.display_string()
        );
        let session = self.connector.connect(&auth).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let handle = match request {
            SessionRequest::Exec => SessionHandle::new(id, key, session, Capability::Exec),
            SessionRequest::FileTransfer => match session.clone().open_sftp().await {
                Ok(fs) => SessionHandle::new(id, key, session, Capability::FileTransfer(fs)),
                Err(e) => {
                    session.end().await;
                    return Err(e.into());
                }
            },
            SessionRequest::Shell { size, sink, .. } => match session.clone().open_shell(size).await {
                Ok(channel) => {
                    let handle = SessionHandle::new(
                        id,
                        key,
                        session,
                        Capability::Shell(ShellWriter::new(channel.input)),
                    );
                    spawn_shell_forwarder(handle.clone(), channel.output, sink);
                    handle
                }
                Err(e) => {
                    session.end().await;
                    return Err(e.into());
                }
            },
        };

        if let Err(e) = self.profiles.touch(&profile.id) {
            warn!("[registry] failed to record last seen for {}: {}", profile.id, e);
        }
        Ok(handle)
    }

    fn watch_liveness(&self, slot: Slot, handle: SessionHandle) {
        let slots = Arc::clone(&self.slots);
        let disconnected = handle.inner.session.subscribe_disconnect();

        tokio::spawn(async move {
            wait_closed(disconnected).await;
            handle.end(CloseReason::RemoteDisconnect).await;

            let mut guard = slot.lock().await;
            let ours = guard.as_ref().map(|h| h.id() == handle.id()).unwrap_or(false);
            if ours {
                *guard = None;
                slots.remove_if(handle.key(), |_, s| Arc::ptr_eq(s, &slot));
                info!("[registry] evicted {} after disconnect", handle.key());
            }
        });
    }

    /// Close the connection's sessions of `kind`, or all of them when `None`.
    ///
    /// Closing the shell kind closes every terminal of the connection. Returns
    /// the number of live sessions that were ended.
    pub async fn close(&self, connection_id: &str, kind: Option<SessionKind>) -> usize {
        let keys: Vec<SessionKey> = self
            .slots
            .iter()
            .filter(|entry| {
                let key = entry.key();
                key.connection_id == connection_id && kind.map_or(true, |k| key.kind == k)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut closed = 0;
        for key in keys {
            if self.close_key(&key).await {
                closed += 1;
            }
        }
        if closed > 0 {
            info!("[registry] closed {} session(s) for {}", closed, connection_id);
        }
        closed
    }

    /// Close one terminal's shell
    pub async fn close_shell(&self, connection_id: &str, terminal_id: &str) -> bool {
        self.close_key(&SessionKey::shell(connection_id, terminal_id))
            .await
    }

    /// Close everything, used on process exit
    pub async fn close_all(&self) -> usize {
        let keys: Vec<SessionKey> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for key in keys {
            if self.close_key(&key).await {
                closed += 1;
            }
        }
        info!("[registry] closed all sessions ({})", closed);
        closed
    }

    async fn close_key(&self, key: &SessionKey) -> bool {
        let Some((_, slot)) = self.slots.remove(key) else {
            return false;
        };
        // Waits out any creation in progress on this key
        let handle = slot.lock().await.take();
        match handle {
            Some(handle) => {
                handle.end(CloseReason::Requested).await;
                true
            }
            None => false,
        }
    }

    /// Keys of all sessions currently held live
    pub fn live_keys(&self) -> Vec<SessionKey> {
        self.slots
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .map(|guard| guard.as_ref().map(|h| h.is_live()).unwrap_or(false))
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }
}

/// Forward shell output to `sink` until the stream ends, then retire the handle
fn spawn_shell_forwarder(
    handle: SessionHandle,
    mut output: mpsc::Receiver<ShellEvent>,
    sink: mpsc::UnboundedSender<ShellEvent>,
) {
    tokio::spawn(async move {
        while let Some(event) = output.recv().await {
            let exited = matches!(event, ShellEvent::Exit { .. });
            if sink.send(event).is_err() {
                debug!("[registry] shell sink for {} dropped", handle.key());
            }
            if exited {
                break;
            }
        }
        handle.end(CloseReason::ShellExited).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AuthMethod, ConnectionStorage, MemoryCredentialStore, ProfileDraft,
    };
    use crate::ssh::SshError;
    use crate::testing::FakeConnector;
    use std::time::Duration;

    fn setup(connector: Arc<FakeConnector>) -> (Arc<SessionRegistry>, String) {
        let profiles = Arc::new(ConnectionStorage::in_memory(Vec::new()));
        let profile = profiles
            .add(ProfileDraft {
                name: "web".into(),
                host: "10.0.0.5".into(),
                username: "root".into(),
                auth_method: AuthMethod::Password,
                ..Default::default()
            })
            .unwrap();
        let resolver = CredentialResolver::new(Arc::new(MemoryCredentialStore::new()));
        let registry = Arc::new(SessionRegistry::new(profiles, resolver, connector));
        (registry, profile.id)
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create_dials_once() {
        let connector = FakeConnector::new().with_dial_delay(Duration::from_millis(50));
        let (registry, id) = setup(connector.clone());

        let (a, b) = tokio::join!(registry.exec_session(&id), registry.exec_session(&id));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(connector.dials(), 1);
        assert_eq!(a.id(), b.id());
        a.exec("true").await.unwrap();
        b.exec("true").await.unwrap();
    }

    #[tokio::test]
    async fn test_kinds_are_independent() {
        let connector = FakeConnector::new();
        let (registry, id) = setup(connector.clone());

        let exec = registry.exec_session(&id).await.unwrap();
        let files = registry.file_session(&id).await.unwrap();
        assert_ne!(exec.id(), files.id());
        assert_eq!(connector.dials(), 2);

        assert!(matches!(exec.fs(), Err(SessionError::WrongKind { .. })));
        assert!(matches!(
            files.exec("true").await.unwrap_err(),
            SessionError::WrongKind { .. }
        ));
    }

    #[tokio::test]
    async fn test_close_then_recreate_dials_again() {
        let connector = FakeConnector::new();
        let (registry, id) = setup(connector.clone());

        let first = registry.exec_session(&id).await.unwrap();
        assert_eq!(registry.close(&id, Some(SessionKind::Exec)).await, 1);
        assert_eq!(first.state(), HandleState::Closed);
        assert_eq!(first.close_reason(), Some(CloseReason::Requested));

        // Idempotent
        assert_eq!(registry.close(&id, Some(SessionKind::Exec)).await, 0);

        let second = registry.exec_session(&id).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(connector.dials(), 2);
        assert!(matches!(
            first.exec("true").await.unwrap_err(),
            SessionError::Ssh(SshError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let connector = FakeConnector::new();
        let (registry, _) = setup(connector.clone());

        let err = registry.exec_session("missing").await.unwrap_err();
        assert!(matches!(err, SessionError::SessionNotFound(_)));
        assert_eq!(connector.dials(), 0);
        assert!(registry.live_keys().is_empty());
    }

    #[tokio::test]
    async fn test_dial_failure_is_not_cached() {
        let connector = FakeConnector::new();
        let (registry, id) = setup(connector.clone());

        connector.fail_dials(Some("connection refused"));
        let err = registry.exec_session(&id).await.unwrap_err();
        assert!(matches!(err, SessionError::Ssh(SshError::DialFailure(_))));

        connector.fail_dials(None);
        registry.exec_session(&id).await.unwrap();
        assert_eq!(connector.dials(), 2);
    }

    #[tokio::test]
    async fn test_remote_drop_evicts_handle() {
        let connector = FakeConnector::new();
        let (registry, id) = setup(connector.clone());

        let handle = registry.exec_session(&id).await.unwrap();
        connector.last_session().unwrap().drop_remote();

        eventually(|| handle.state() == HandleState::Closed).await;
        assert_eq!(handle.close_reason(), Some(CloseReason::RemoteDisconnect));
        eventually(|| registry.live_keys().is_empty()).await;

        let fresh = registry.exec_session(&id).await.unwrap();
        assert!(fresh.is_live());
        assert_eq!(connector.dials(), 2);
    }

    #[tokio::test]
    async fn test_shell_output_forwarded_in_order() {
        let connector = FakeConnector::new();
        let (registry, id) = setup(connector.clone());
        let (sink, mut events) = mpsc::unbounded_channel();

        let handle = registry
            .get_or_create(
                &id,
                SessionRequest::Shell {
                    terminal_id: "t1".into(),
                    size: PtySize::default(),
                    sink,
                },
            )
            .await
            .unwrap();

        let writer = handle.shell().unwrap();
        writer.write(b"ls\n".to_vec()).await.unwrap();
        writer.write(b"pwd\n".to_vec()).await.unwrap();

        assert_eq!(events.recv().await, Some(ShellEvent::Data(b"ls\n".to_vec())));
        assert_eq!(events.recv().await, Some(ShellEvent::Data(b"pwd\n".to_vec())));

        assert!(registry.close_shell(&id, "t1").await);
        assert_eq!(
            events.recv().await,
            Some(ShellEvent::Exit {
                exit_status: Some(0)
            })
        );
    }

    #[tokio::test]
    async fn test_close_shell_kind_closes_every_terminal() {
        let connector = FakeConnector::new();
        let (registry, id) = setup(connector.clone());

        let mut shells = Vec::new();
        for tid in ["t1", "t2"] {
            let (sink, _events) = mpsc::unbounded_channel();
            shells.push(
                registry
                    .get_or_create(
                        &id,
                        SessionRequest::Shell {
                            terminal_id: tid.into(),
                            size: PtySize::default(),
                            sink,
                        },
                    )
                    .await
                    .unwrap(),
            );
        }
        let exec = registry.exec_session(&id).await.unwrap();

        assert_eq!(registry.close(&id, Some(SessionKind::Shell)).await, 2);
        assert!(shells.iter().all(|s| !s.is_live()));
        assert!(exec.is_live());
    }

    #[tokio::test]
    async fn test_close_connection_closes_all_kinds() {
        let connector = FakeConnector::new();
        let (registry, id) = setup(connector.clone());

        let exec = registry.exec_session(&id).await.unwrap();
        let files = registry.file_session(&id).await.unwrap();
        let (sink, _events) = mpsc::unbounded_channel();
        let shell = registry
            .get_or_create(
                &id,
                SessionRequest::Shell {
                    terminal_id: "t1".into(),
                    size: PtySize::default(),
                    sink,
                },
            )
            .await
            .unwrap();

        assert_eq!(registry.close(&id, None).await, 3);
        for handle in [&exec, &files, &shell] {
            assert_eq!(handle.state(), HandleState::Closed);
        }
        assert!(connector.sessions().iter().all(|s| s.is_closed()));
        assert!(registry.live_keys().is_empty());
    }
}
