//! russh-sftp implementation of [`RemoteFs`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use russh_sftp::client::error::Error as ClientError;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::SftpError;
use super::types::FileEntry;
use super::RemoteFs;

pub struct SftpFs {
    sftp: SftpSession,
}

impl SftpFs {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>, SftpError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))?;

        let mut files: Vec<FileEntry> = entries
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| {
                let file_type = entry.file_type();
                let meta = entry.metadata();
                FileEntry {
                    name: entry.file_name(),
                    is_directory: file_type.is_dir(),
                    is_file: file_type.is_file(),
                    is_symlink: file_type.is_symlink(),
                    size: meta.size.unwrap_or(0),
                    modified: meta
                        .mtime
                        .and_then(|t| DateTime::<Utc>::from_timestamp(i64::from(t), 0)),
                    permissions: meta.permissions,
                }
            })
            .collect();

        // Directories first, then by name
        files.sort_by(|a, b| {
            b.is_directory
                .cmp(&a.is_directory)
                .then_with(|| a.name.cmp(&b.name))
        });
        debug!("Listed {} entries in {}", files.len(), path);
        Ok(files)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, SftpError> {
        self.sftp
            .read(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), SftpError> {
        let mut file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))?;
        file.write_all(data).await?;
        file.shutdown().await?;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<(), SftpError> {
        self.sftp
            .remove_file(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        self.sftp
            .rename(from, to)
            .await
            .map_err(|e| SftpError::from_remote(e, from))
    }

    async fn create_dir(&self, path: &str) -> Result<(), SftpError> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| SftpError::from_remote(e, path))
    }

    async fn remove_dir(&self, path: &str) -> Result<(), SftpError> {
        self.sftp.remove_dir(path).await.map_err(|e| match e {
            // rmdir on a populated directory comes back as a generic failure
            ClientError::Status(ref status) if matches!(status.status_code, StatusCode::Failure) => {
                SftpError::DirectoryNotEmpty(path.to_string())
            }
            other => SftpError::from_remote(other, path),
        })
    }

    async fn close(&self) {
        if let Err(e) = self.sftp.close().await {
            debug!("SFTP close: {}", e);
        }
    }
}
