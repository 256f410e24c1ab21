//! Line-delimited JSON-RPC server
//!
//! One reader loop parses requests and spawns a task per request, so a slow
//! remote command never blocks terminal input. `terminal/*` requests are the
//! exception: each terminal gets one lane that handles its requests in arrival
//! order, so keystrokes and resizes reach the shell exactly as sent.
//! Responses and notifications funnel through a single writer task, which
//! keeps every output line whole.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::protocol::*;
use crate::app::AppState;
use crate::commands::{self, CommandError};
use crate::config::{Snippet, SnippetDraft};
use crate::metrics::MetricsUpdate;
use crate::session::SessionError;
use crate::sftp::{ContentEncoding, SftpError};
use crate::ssh::{PtySize, ShellEvent, SshError};

/// Queue depth for outgoing lines
const OUTPUT_CAPACITY: usize = 256;

/// Routes requests to the command façade and emits notifications
#[derive(Clone)]
pub struct Dispatcher {
    state: Arc<AppState>,
    out_tx: mpsc::Sender<String>,
}

impl Dispatcher {
    pub fn new(state: Arc<AppState>, out_tx: mpsc::Sender<String>) -> Self {
        Self { state, out_tx }
    }

    pub async fn handle(&self, request: Request) -> Response {
        debug!("[ipc] <- {} #{}", request.method, request.id);
        match self.dispatch(&request.method, request.params).await {
            Ok(result) => Response::ok(request.id, result),
            Err(error) => {
                debug!("[ipc] #{} failed: {}", request.id, error.message);
                Response::err(request.id, error)
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let state = self.state.as_ref();
        match method {
            // connections/*
            "connections/list" => to_value(commands::connections::list_connections(state)),
            "connections/add" => {
                let p: AddConnectionParams = parse(params)?;
                reply(commands::connections::add_connection(
                    state,
                    p.profile,
                    p.password.as_deref(),
                ))
            }
            "connections/update" => {
                let p: UpdateConnectionParams = parse(params)?;
                reply(
                    commands::connections::update_connection(
                        state,
                        &p.connection_id,
                        p.update,
                        p.password.as_deref(),
                    )
                    .await,
                )
            }
            "connections/remove" => {
                let p: ConnectionParams = parse(params)?;
                reply(commands::connections::remove_connection(state, &p.connection_id).await)
            }
            "connections/setPassword" => {
                let p: SetPasswordParams = parse(params)?;
                reply(commands::connections::set_password(
                    state,
                    &p.connection_id,
                    &p.password,
                ))
            }
            "connections/test" => {
                let p: TestConnectionParams = parse(params)?;
                reply(
                    commands::connections::test_connection(
                        state,
                        p.profile,
                        p.connection_id.as_deref(),
                        p.password.as_deref(),
                    )
                    .await,
                )
            }

            // snippets/*
            "snippets/list" => to_value(commands::snippets::list_snippets(state)),
            "snippets/add" => {
                let draft: SnippetDraft = parse(params)?;
                reply(commands::snippets::add_snippet(state, draft))
            }
            "snippets/update" => {
                let snippet: Snippet = parse(params)?;
                reply(commands::snippets::update_snippet(state, snippet))
            }
            "snippets/remove" => {
                let p: SnippetIdParams = parse(params)?;
                reply(commands::snippets::delete_snippet(state, &p.id))
            }

            // ssh/exec + process/*
            "ssh/exec" => {
                let p: ExecParams = parse(params)?;
                reply(commands::exec::run_command(state, &p.connection_id, &p.command).await)
            }
            "process/list" => {
                let p: ConnectionParams = parse(params)?;
                reply(commands::exec::list_processes(state, &p.connection_id).await)
            }
            "process/kill" => {
                let p: KillParams = parse(params)?;
                reply(commands::exec::kill_process(state, &p.connection_id, &p.pid).await)
            }

            // sftp/*
            "sftp/list" => {
                let p: PathParams = parse(params)?;
                reply(commands::sftp::list_dir(state, &p.connection_id, &p.path).await)
            }
            "sftp/readFile" => {
                let p: ReadFileParams = parse(params)?;
                let content =
                    commands::sftp::read_file(state, &p.connection_id, &p.path, p.encoding)
                        .await
                        .map_err(rpc_error)?;
                Ok(serde_json::json!({ "content": content, "encoding": p.encoding.as_str() }))
            }
            "sftp/writeFile" => {
                let p: WriteFileParams = parse(params)?;
                reply(
                    commands::sftp::write_file(
                        state,
                        &p.connection_id,
                        &p.path,
                        &p.content,
                        p.encoding,
                    )
                    .await,
                )
            }
            "sftp/delete" => {
                let p: PathParams = parse(params)?;
                reply(commands::sftp::delete_file(state, &p.connection_id, &p.path).await)
            }
            "sftp/rename" => {
                let p: RenameParams = parse(params)?;
                reply(
                    commands::sftp::rename(state, &p.connection_id, &p.old_path, &p.new_path)
                        .await,
                )
            }
            "sftp/mkdir" => {
                let p: PathParams = parse(params)?;
                reply(commands::sftp::create_dir(state, &p.connection_id, &p.path).await)
            }
            "sftp/rmdir" => {
                let p: PathParams = parse(params)?;
                reply(commands::sftp::remove_dir(state, &p.connection_id, &p.path).await)
            }
            "sftp/download" => {
                let p: TransferParams = parse(params)?;
                reply(
                    commands::sftp::download(
                        state,
                        &p.connection_id,
                        &p.remote_path,
                        Path::new(&p.local_path),
                    )
                    .await,
                )
            }
            "sftp/upload" => {
                let p: TransferParams = parse(params)?;
                reply(
                    commands::sftp::upload(
                        state,
                        &p.connection_id,
                        Path::new(&p.local_path),
                        &p.remote_path,
                    )
                    .await,
                )
            }

            // metrics/*
            "metrics/start" => {
                let p: ConnectionParams = parse(params)?;
                let sink = self.metrics_sink(p.connection_id.clone());
                reply(commands::metrics::start_metrics(state, &p.connection_id, sink).await)
            }
            "metrics/stop" => to_value(commands::metrics::stop_metrics(state).await),

            // terminal/*
            "terminal/create" => {
                let p: TerminalCreateParams = parse(params)?;
                let sink = self.terminal_sink(p.connection_id.clone(), p.terminal_id.clone());
                let size = PtySize {
                    rows: p.rows,
                    cols: p.cols,
                };
                reply(
                    commands::terminal::create_terminal(
                        state,
                        &p.connection_id,
                        &p.terminal_id,
                        size,
                        sink,
                    )
                    .await,
                )
            }
            "terminal/write" => {
                let p: TerminalWriteParams = parse(params)?;
                let data = decode_input(&p.data, p.encoding)?;
                reply(
                    commands::terminal::write_terminal(
                        state,
                        &p.connection_id,
                        &p.terminal_id,
                        data,
                    )
                    .await,
                )
            }
            "terminal/resize" => {
                let p: TerminalResizeParams = parse(params)?;
                let size = PtySize {
                    rows: p.rows,
                    cols: p.cols,
                };
                reply(
                    commands::terminal::resize_terminal(
                        state,
                        &p.connection_id,
                        &p.terminal_id,
                        size,
                    )
                    .await,
                )
            }
            "terminal/stop" => {
                let p: TerminalParams = parse(params)?;
                to_value(
                    commands::terminal::stop_terminal(state, &p.connection_id, &p.terminal_id)
                        .await,
                )
            }

            // session/*
            "session/close" => {
                let p: SessionCloseParams = parse(params)?;
                to_value(commands::session::close_session(state, &p.connection_id, p.kind).await)
            }
            "session/list" => to_value(commands::session::list_sessions(state)),

            _ => Err(RpcError::new(
                ERR_METHOD_NOT_FOUND,
                format!("Unknown method: {}", method),
            )),
        }
    }

    /// Forward poller updates as `metrics/update` until the poller drops the sink
    fn metrics_sink(&self, connection_id: String) -> mpsc::UnboundedSender<MetricsUpdate> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MetricsUpdate>();
        let out_tx = self.out_tx.clone();
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let params = MetricsNotification {
                    connection_id: connection_id.clone(),
                    update,
                };
                if !notify(&out_tx, NOTIFY_METRICS_UPDATE, params).await {
                    break;
                }
            }
            debug!("[ipc] metrics forwarder for {} ended", connection_id);
        });
        tx
    }

    /// Forward shell output as `terminal/data`, then one `terminal/exit`
    fn terminal_sink(
        &self,
        connection_id: String,
        terminal_id: String,
    ) -> mpsc::UnboundedSender<ShellEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<ShellEvent>();
        let out_tx = self.out_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ShellEvent::Data(bytes) => {
                        let params = TerminalData {
                            connection_id: connection_id.clone(),
                            terminal_id: terminal_id.clone(),
                            data: base64::engine::general_purpose::STANDARD.encode(bytes),
                        };
                        if !notify(&out_tx, NOTIFY_TERMINAL_DATA, params).await {
                            break;
                        }
                    }
                    ShellEvent::Exit { exit_status } => {
                        let params = TerminalExit {
                            connection_id: connection_id.clone(),
                            terminal_id: terminal_id.clone(),
                            exit_status,
                        };
                        notify(&out_tx, NOTIFY_TERMINAL_EXIT, params).await;
                        break;
                    }
                }
            }
        });
        tx
    }
}

/// Serve requests from `reader` until EOF, writing replies to `writer`
pub async fn serve<R, W>(state: Arc<AppState>, reader: R, writer: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel::<String>(OUTPUT_CAPACITY);
    tokio::spawn(write_loop(writer, out_rx));

    let dispatcher = Dispatcher::new(state, out_tx.clone());
    let mut lanes = TerminalLanes::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!("[ipc] malformed request: {}", e);
                let response = Response::err(0, RpcError::new(ERR_PARSE, e.to_string()));
                send(&out_tx, &response).await;
                continue;
            }
        };

        let request = match lanes.route(request, &dispatcher, &out_tx) {
            Some(request) => request,
            None => continue,
        };

        let dispatcher = dispatcher.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            let response = dispatcher.handle(request).await;
            send(&out_tx, &response).await;
        });
    }

    info!("[ipc] input closed");
    Ok(())
}

type TerminalTarget = (String, String);

/// One ordered request queue per (connection, terminal)
#[derive(Default)]
struct TerminalLanes {
    lanes: HashMap<TerminalTarget, mpsc::UnboundedSender<Request>>,
}

impl TerminalLanes {
    /// Queue a `terminal/*` request on its terminal's lane. Anything else is
    /// handed back for concurrent handling.
    fn route(
        &mut self,
        request: Request,
        dispatcher: &Dispatcher,
        out_tx: &mpsc::Sender<String>,
    ) -> Option<Request> {
        if !request.method.starts_with("terminal/") {
            return Some(request);
        }
        // Malformed params get their error from the dispatcher
        let target = match serde_json::from_value::<TerminalParams>(request.params.clone()) {
            Ok(p) => (p.connection_id, p.terminal_id),
            Err(_) => return Some(request),
        };
        let closing = request.method == "terminal/stop";

        let lane = self
            .lanes
            .entry(target.clone())
            .or_insert_with(|| spawn_lane(dispatcher.clone(), out_tx.clone()));
        let rejected = lane.send(request).err().map(|e| e.0);

        if closing || rejected.is_some() {
            // Dropping the sender lets the lane drain and exit
            self.lanes.remove(&target);
        }
        rejected
    }
}

fn spawn_lane(
    dispatcher: Dispatcher,
    out_tx: mpsc::Sender<String>,
) -> mpsc::UnboundedSender<Request> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Request>();
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let response = dispatcher.handle(request).await;
            send(&out_tx, &response).await;
        }
    });
    tx
}

async fn write_loop<W>(mut writer: W, mut out_rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = out_rx.recv().await {
        let written: std::io::Result<()> = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!("[ipc] write failed, output closed: {}", e);
            break;
        }
    }
    debug!("[ipc] writer ended");
}

async fn send<T: Serialize>(out_tx: &mpsc::Sender<String>, message: &T) -> bool {
    match serde_json::to_string(message) {
        Ok(line) => out_tx.send(line).await.is_ok(),
        Err(e) => {
            warn!("[ipc] failed to serialize message: {}", e);
            false
        }
    }
}

async fn notify<T: Serialize>(out_tx: &mpsc::Sender<String>, method: &str, params: T) -> bool {
    let params = match serde_json::to_value(params) {
        Ok(params) => params,
        Err(e) => {
            warn!("[ipc] failed to serialize {} params: {}", method, e);
            return false;
        }
    };
    send(
        out_tx,
        &Notification {
            method: method.to_string(),
            params,
        },
    )
    .await
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params)
        .map_err(|e| RpcError::new(ERR_INVALID_PARAMS, format!("Invalid params: {}", e)))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::new(ERR_INTERNAL, e.to_string()))
}

fn reply<T: Serialize>(result: Result<T, CommandError>) -> Result<Value, RpcError> {
    to_value(result.map_err(rpc_error)?)
}

fn decode_input(data: &str, encoding: ContentEncoding) -> Result<Vec<u8>, RpcError> {
    match encoding {
        ContentEncoding::Utf8 => Ok(data.as_bytes().to_vec()),
        ContentEncoding::Base64 => base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| RpcError::new(ERR_INVALID_PARAMS, format!("Invalid base64: {}", e))),
    }
}

fn rpc_error(error: CommandError) -> RpcError {
    RpcError::new(error_code(&error), error.to_string()).with_data(error.detail())
}

fn error_code(error: &CommandError) -> i32 {
    match error {
        CommandError::InvalidPid(_) => ERR_INVALID_PARAMS,
        CommandError::ConnectionNotFound(_) | CommandError::TerminalNotFound(_) => ERR_NOT_FOUND,
        CommandError::Session(SessionError::SessionNotFound(_)) => ERR_NOT_FOUND,
        CommandError::Session(SessionError::WrongKind { .. }) => ERR_INTERNAL,
        CommandError::Ssh(e) | CommandError::Session(SessionError::Ssh(e)) => ssh_code(e),
        CommandError::Sftp(e) | CommandError::Session(SessionError::Sftp(e)) => sftp_code(e),
        CommandError::Storage(_) | CommandError::Keychain(_) => ERR_IO,
    }
}

fn ssh_code(error: &SshError) -> i32 {
    match error {
        SshError::InvalidAuthMethod(_) => ERR_INVALID_PARAMS,
        SshError::CommandFailure { .. } => ERR_COMMAND_FAILED,
        SshError::Disconnected => ERR_DISCONNECTED,
        SshError::KeyReadFailure { .. } | SshError::DialFailure(_) | SshError::Channel(_) => ERR_IO,
    }
}

fn sftp_code(error: &SftpError) -> i32 {
    match error {
        SftpError::FileNotFound(_) => ERR_NOT_FOUND,
        SftpError::PermissionDenied(_) => ERR_PERMISSION,
        SftpError::InvalidPath(_) | SftpError::InvalidEncoding { .. } => ERR_INVALID_PARAMS,
        SftpError::DirectoryNotEmpty(_) => ERR_DIR_NOT_EMPTY,
        SftpError::IoError(_)
        | SftpError::ChannelError(_)
        | SftpError::ProtocolError(_) => ERR_IO,
    }
}
