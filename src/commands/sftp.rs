//! File transfer commands
//!
//! All calls for one connection share its cached file-transfer session.

use std::path::Path;

use super::CommandResult;
use crate::app::AppState;
use crate::sftp::{self, ContentEncoding, FileEntry, RemoteFs};
use std::sync::Arc;

async fn fs(state: &AppState, connection_id: &str) -> CommandResult<Arc<dyn RemoteFs>> {
    Ok(state.registry.file_session(connection_id).await?.fs()?)
}

pub async fn list_dir(
    state: &AppState,
    connection_id: &str,
    path: &str,
) -> CommandResult<Vec<FileEntry>> {
    Ok(fs(state, connection_id).await?.list(path).await?)
}

pub async fn read_file(
    state: &AppState,
    connection_id: &str,
    path: &str,
    encoding: ContentEncoding,
) -> CommandResult<String> {
    let fs = fs(state, connection_id).await?;
    Ok(sftp::read_file(fs.as_ref(), path, encoding).await?)
}

pub async fn write_file(
    state: &AppState,
    connection_id: &str,
    path: &str,
    content: &str,
    encoding: ContentEncoding,
) -> CommandResult<()> {
    let fs = fs(state, connection_id).await?;
    Ok(sftp::write_file(fs.as_ref(), path, content, encoding).await?)
}

pub async fn delete_file(state: &AppState, connection_id: &str, path: &str) -> CommandResult<()> {
    Ok(fs(state, connection_id).await?.remove_file(path).await?)
}

pub async fn rename(
    state: &AppState,
    connection_id: &str,
    from: &str,
    to: &str,
) -> CommandResult<()> {
    Ok(fs(state, connection_id).await?.rename(from, to).await?)
}

pub async fn create_dir(state: &AppState, connection_id: &str, path: &str) -> CommandResult<()> {
    Ok(fs(state, connection_id).await?.create_dir(path).await?)
}

pub async fn remove_dir(state: &AppState, connection_id: &str, path: &str) -> CommandResult<()> {
    Ok(fs(state, connection_id).await?.remove_dir(path).await?)
}

/// Copy a remote file to `local`; returns bytes written
pub async fn download(
    state: &AppState,
    connection_id: &str,
    remote: &str,
    local: &Path,
) -> CommandResult<u64> {
    let fs = fs(state, connection_id).await?;
    Ok(sftp::download(fs.as_ref(), remote, local).await?)
}

/// Copy `local` to the remote host; returns bytes sent
pub async fn upload(
    state: &AppState,
    connection_id: &str,
    local: &Path,
    remote: &str,
) -> CommandResult<u64> {
    let fs = fs(state, connection_id).await?;
    Ok(sftp::upload(fs.as_ref(), local, remote).await?)
}
