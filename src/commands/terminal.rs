//! Interactive terminal commands
//!
//! Each terminal owns its own shell session, keyed by connection and terminal
//! id. Output is pushed to the sink given at creation until the shell exits.

use tokio::sync::mpsc;
use tracing::info;

use super::{CommandError, CommandResult};
use crate::app::AppState;
use crate::session::{SessionHandle, SessionKey, SessionRequest};
use crate::ssh::{PtySize, ShellEvent};

/// Open (or reuse) the shell for `terminal_id`.
///
/// If the terminal already has a live shell, `sink` is dropped and output
/// keeps flowing to the sink given first.
pub async fn create_terminal(
    state: &AppState,
    connection_id: &str,
    terminal_id: &str,
    size: PtySize,
    sink: mpsc::UnboundedSender<ShellEvent>,
) -> CommandResult<()> {
    state
        .registry
        .get_or_create(
            connection_id,
            SessionRequest::Shell {
                terminal_id: terminal_id.to_string(),
                size,
                sink,
            },
        )
        .await?;
    info!(
        "Terminal {} open on {} ({}x{})",
        terminal_id, connection_id, size.cols, size.rows
    );
    Ok(())
}

async fn terminal(
    state: &AppState,
    connection_id: &str,
    terminal_id: &str,
) -> CommandResult<SessionHandle> {
    state
        .registry
        .get(&SessionKey::shell(connection_id, terminal_id))
        .await
        .ok_or_else(|| CommandError::TerminalNotFound(terminal_id.to_string()))
}

pub async fn write_terminal(
    state: &AppState,
    connection_id: &str,
    terminal_id: &str,
    data: Vec<u8>,
) -> CommandResult<()> {
    let writer = terminal(state, connection_id, terminal_id).await?.shell()?;
    Ok(writer.write(data).await?)
}

pub async fn resize_terminal(
    state: &AppState,
    connection_id: &str,
    terminal_id: &str,
    size: PtySize,
) -> CommandResult<()> {
    let writer = terminal(state, connection_id, terminal_id).await?.shell()?;
    Ok(writer.resize(size).await?)
}

/// Close the terminal's shell; `false` when it was not open
pub async fn stop_terminal(state: &AppState, connection_id: &str, terminal_id: &str) -> bool {
    state.registry.close_shell(connection_id, terminal_id).await
}
