//! In-process transport fakes for unit tests

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::app::AppState;
use crate::config::{
    AppSettings, AuthMethod, ConnectionStorage, CredentialStore, MemoryCredentialStore,
    ProfileDraft, SnippetStorage,
};
use crate::sftp::{FileEntry, RemoteFs, SftpError};
use crate::ssh::{
    AuthDescriptor, Connector, ExecOutput, PtySize, RemoteSession, ShellChannel, ShellEvent,
    ShellInput, SshError,
};

#[derive(Clone)]
enum Reply {
    Ok(String),
    Fail { exit_code: i32, stderr: String },
}

/// Behaviour shared by every session a [`FakeConnector`] hands out
#[derive(Default)]
struct FakeHost {
    replies: Mutex<HashMap<String, Reply>>,
    delays: Mutex<HashMap<String, Duration>>,
    commands: Mutex<Vec<String>>,
    fs: Arc<FakeFs>,
}

/// Connector whose "remote host" is a table of scripted command replies and
/// an in-memory filesystem.
///
/// Unscripted commands succeed with empty output, except `false` which exits 1.
pub struct FakeConnector {
    host: Arc<FakeHost>,
    dials: AtomicUsize,
    dial_delay: Duration,
    dial_error: Mutex<Option<String>>,
    auths: Mutex<Vec<AuthDescriptor>>,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(Duration::ZERO))
    }

    fn build(dial_delay: Duration) -> Self {
        Self {
            host: Arc::new(FakeHost::default()),
            dials: AtomicUsize::new(0),
            dial_delay,
            dial_error: Mutex::new(None),
            auths: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
        }
    }

    pub fn with_dial_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        let mut fresh = Self::build(delay);
        fresh.host = Arc::clone(&self.host);
        Arc::new(fresh)
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn fail_dials(&self, message: Option<&str>) {
        *self.dial_error.lock() = message.map(str::to_string);
    }

    pub fn auths(&self) -> Vec<AuthDescriptor> {
        self.auths.lock().clone()
    }

    pub fn reply(&self, command: &str, stdout: &str) {
        self.host
            .replies
            .lock()
            .insert(command.to_string(), Reply::Ok(stdout.to_string()));
    }

    pub fn fail(&self, command: &str, exit_code: i32, stderr: &str) {
        self.host.replies.lock().insert(
            command.to_string(),
            Reply::Fail {
                exit_code,
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn delay(&self, command: &str, delay: Duration) {
        self.host
            .delays
            .lock()
            .insert(command.to_string(), delay);
    }

    /// Every command executed so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.host.commands.lock().clone()
    }

    pub fn fs(&self) -> Arc<FakeFs> {
        Arc::clone(&self.host.fs)
    }

    pub fn sessions(&self) -> Vec<Arc<FakeSession>> {
        self.sessions.lock().clone()
    }

    pub fn last_session(&self) -> Option<Arc<FakeSession>> {
        self.sessions.lock().last().cloned()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, auth: &AuthDescriptor) -> Result<Arc<dyn RemoteSession>, SshError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.auths.lock().push(auth.clone());
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        if let Some(message) = self.dial_error.lock().clone() {
            return Err(SshError::DialFailure(message));
        }

        let (closed_tx, _) = watch::channel(false);
        let session = Arc::new(FakeSession {
            host: Arc::clone(&self.host),
            closed_tx,
            ended: AtomicBool::new(false),
        });
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

pub struct FakeSession {
    host: Arc<FakeHost>,
    closed_tx: watch::Sender<bool>,
    ended: AtomicBool,
}

impl FakeSession {
    /// Simulate the server dropping the connection
    pub fn drop_remote(&self) {
        self.closed_tx.send_replace(true);
    }

    /// Whether `end()` was called on this session
    pub fn was_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn exec(&self, command: &str) -> Result<ExecOutput, SshError> {
        if self.is_closed() {
            return Err(SshError::Disconnected);
        }
        self.host.commands.lock().push(command.to_string());

        let delay = self.host.delays.lock().get(command).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.host.replies.lock().get(command).cloned();
        match reply {
            Some(Reply::Ok(stdout)) => Ok(ExecOutput {
                stdout,
                stderr: String::new(),
            }),
            Some(Reply::Fail { exit_code, stderr }) => Err(SshError::CommandFailure {
                exit_code,
                stdout: String::new(),
                stderr,
            }),
            None if command == "false" => Err(SshError::CommandFailure {
                exit_code: 1,
                stdout: String::new(),
                stderr: String::new(),
            }),
            None => Ok(ExecOutput::default()),
        }
    }

    async fn open_sftp(&self) -> Result<Arc<dyn RemoteFs>, SshError> {
        Ok(Arc::clone(&self.host.fs) as Arc<dyn RemoteFs>)
    }

    /// Echo shell: input bytes come straight back as output
    async fn open_shell(&self, _size: PtySize) -> Result<ShellChannel, SshError> {
        let (input_tx, mut input_rx) = mpsc::channel::<ShellInput>(16);
        let (output_tx, output_rx) = mpsc::channel::<ShellEvent>(16);
        let mut closed = self.closed_tx.subscribe();

        tokio::spawn(async move {
            let exit_status = loop {
                tokio::select! {
                    biased;
                    input = input_rx.recv() => match input {
                        Some(ShellInput::Data(bytes)) => {
                            let _ = output_tx.send(ShellEvent::Data(bytes)).await;
                        }
                        Some(ShellInput::Resize(_)) => {}
                        Some(ShellInput::Close) | None => break Some(0),
                    },
                    _ = async { let _ = closed.wait_for(|c| *c).await; } => break None,
                }
            };
            let _ = output_tx.send(ShellEvent::Exit { exit_status }).await;
        });

        Ok(ShellChannel {
            input: input_tx,
            output: output_rx,
        })
    }

    async fn end(&self) {
        self.ended.store(true, Ordering::SeqCst);
        self.closed_tx.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    fn subscribe_disconnect(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }
}

/// In-memory remote filesystem
#[derive(Default)]
pub struct FakeFs {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    dirs: Mutex<BTreeSet<String>>,
    closes: AtomicUsize,
}

fn parent_of(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => ".",
    }
}

fn name_of(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string()
}

impl FakeFs {
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.lock().contains_key(path) || self.dirs.lock().contains(path)
    }

    fn has_children(&self, dir: &str) -> bool {
        self.files.lock().keys().any(|p| parent_of(p) == dir)
            || self.dirs.lock().iter().any(|p| parent_of(p) == dir)
    }
}

#[async_trait]
impl RemoteFs for FakeFs {
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        if path != "/" && !self.dirs.lock().contains(path) {
            return Err(SftpError::FileNotFound(path.to_string()));
        }
        let mut entries: Vec<FileEntry> = self
            .dirs
            .lock()
            .iter()
            .filter(|p| parent_of(p) == path)
            .map(|p| FileEntry {
                name: name_of(p),
                is_directory: true,
                is_file: false,
                is_symlink: false,
                size: 0,
                modified: Some(Utc::now()),
                permissions: Some(0o40755),
            })
            .collect();
        entries.extend(
            self.files
                .lock()
                .iter()
                .filter(|(p, _)| parent_of(p) == path)
                .map(|(p, data)| FileEntry {
                    name: name_of(p),
                    is_directory: false,
                    is_file: true,
                    is_symlink: false,
                    size: data.len() as u64,
                    modified: Some(Utc::now()),
                    permissions: Some(0o100644),
                }),
        );
        Ok(entries)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        self.files
            .lock()
            .get(path)
            .cloned()
            .ok_or_else(|| SftpError::FileNotFound(path.to_string()))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), SftpError> {
        self.files.lock().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        self.files
            .lock()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| SftpError::FileNotFound(path.to_string()))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        let data = self
            .files
            .lock()
            .remove(from)
            .ok_or_else(|| SftpError::FileNotFound(from.to_string()))?;
        self.files.lock().insert(to.to_string(), data);
        Ok(())
    }

    async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        self.dirs.lock().insert(path.to_string());
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        if !self.dirs.lock().contains(path) {
            return Err(SftpError::FileNotFound(path.to_string()));
        }
        if self.has_children(path) {
            return Err(SftpError::DirectoryNotEmpty(path.to_string()));
        }
        self.dirs.lock().remove(path);
        Ok(())
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// App state over in-memory stores and `connector`
pub fn app_state(connector: Arc<FakeConnector>) -> (AppState, Arc<MemoryCredentialStore>) {
    let credentials = Arc::new(MemoryCredentialStore::new());
    let state = AppState::new(
        AppSettings::default(),
        Arc::new(ConnectionStorage::in_memory(Vec::new())),
        Arc::new(SnippetStorage::in_memory()),
        Arc::clone(&credentials) as Arc<dyn CredentialStore>,
        connector,
    );
    (state, credentials)
}

/// Add a password profile for `root@10.0.0.5` and store its secret; returns the id
pub fn password_profile(state: &AppState, password: &str) -> String {
    let profile = state
        .profiles
        .add(ProfileDraft {
            name: "web".into(),
            host: "10.0.0.5".into(),
            username: "root".into(),
            auth_method: AuthMethod::Password,
            services: vec!["nginx".into()],
            ..Default::default()
        })
        .unwrap();
    state.credentials.set(&profile.id, password).unwrap();
    profile.id
}
