//! Remote command and process commands

use serde::Serialize;
use tracing::info;

use super::{CommandError, CommandResult};
use crate::app::AppState;
use crate::ssh::ExecOutput;

const PROCESS_LIST_CMD: &str = "ps -eo pid=,user=,pcpu=,pmem=,comm= --sort=-pcpu | head -n 100";

/// One row of the remote process table
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RemoteProcess {
    pub pid: u32,
    pub user: String,
    pub cpu: f64,
    pub mem: f64,
    pub command: String,
}

pub async fn run_command(
    state: &AppState,
    connection_id: &str,
    command: &str,
) -> CommandResult<ExecOutput> {
    let session = state.registry.exec_session(connection_id).await?;
    Ok(session.exec(command).await?)
}

/// Top 100 processes by CPU usage
pub async fn list_processes(
    state: &AppState,
    connection_id: &str,
) -> CommandResult<Vec<RemoteProcess>> {
    let output = run_command(state, connection_id, PROCESS_LIST_CMD).await?;
    Ok(parse_processes(&output.stdout))
}

/// Send SIGKILL to `pid`; anything but a plain number is rejected locally
pub async fn kill_process(state: &AppState, connection_id: &str, pid: &str) -> CommandResult<()> {
    let pid: u32 = pid
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidPid(pid.to_string()))?;

    run_command(state, connection_id, &format!("kill -9 {}", pid)).await?;
    info!("Killed process {} on {}", pid, connection_id);
    Ok(())
}

fn parse_processes(stdout: &str) -> Vec<RemoteProcess> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let pid = cols.next()?.parse().ok()?;
            let user = cols.next()?.to_string();
            let cpu = cols.next()?.parse().unwrap_or(0.0);
            let mem = cols.next()?.parse().unwrap_or(0.0);
            let command = cols.collect::<Vec<_>>().join(" ");
            if command.is_empty() {
                return None;
            }
            Some(RemoteProcess {
                pid,
                user,
                cpu,
                mem,
                command,
            })
        })
        .collect()
}
