//! SFTP file operations
//!
//! [`RemoteFs`] is the file-transfer capability of a session. The russh-sftp
//! backed [`SftpFs`] multiplexes concurrent requests over one channel.

pub mod error;
pub mod session;
pub mod transfer;
pub mod types;

use async_trait::async_trait;

pub use error::SftpError;
pub use session::SftpFs;
pub use transfer::{download, read_file, upload, write_file};
pub use types::{ContentEncoding, FileEntry};

#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn list(&self, path: &str) -> Result<Vec<FileEntry>, SftpError>;
    async fn read(&self, path: &str) -> Result<Vec<u8>, SftpError>;
    /// Create or truncate `path` and write `data`
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), SftpError>;
    async fn remove_file(&self, path: &str) -> Result<(), SftpError>;
    async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError>;
    async fn create_dir(&self, path: &str) -> Result<(), SftpError>;
    /// Remove an empty directory
    async fn remove_dir(&self, path: &str) -> Result<(), SftpError>;
    async fn close(&self);
}
