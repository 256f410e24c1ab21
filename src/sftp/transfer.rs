//! Content encoding and local ⇄ remote copies on top of [`RemoteFs`]

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::info;

use super::error::SftpError;
use super::types::ContentEncoding;
use super::RemoteFs;

fn check_path(path: &str) -> Result<(), SftpError> {
    if path.trim().is_empty() {
        return Err(SftpError::InvalidPath("empty path".to_string()));
    }
    Ok(())
}

/// Read a remote file as text or base64
pub async fn read_file(
    fs: &dyn RemoteFs,
    path: &str,
    encoding: ContentEncoding,
) -> Result<String, SftpError> {
    check_path(path)?;
    let bytes = fs.read(path).await?;
    Ok(match encoding {
        ContentEncoding::Utf8 => String::from_utf8_lossy(&bytes).into_owned(),
        ContentEncoding::Base64 => STANDARD.encode(&bytes),
    })
}

/// Write `content` (text or base64) to a remote file, replacing it
pub async fn write_file(
    fs: &dyn RemoteFs,
    path: &str,
    content: &str,
    encoding: ContentEncoding,
) -> Result<(), SftpError> {
    check_path(path)?;
    let bytes = match encoding {
        ContentEncoding::Utf8 => content.as_bytes().to_vec(),
        ContentEncoding::Base64 => {
            STANDARD
                .decode(content.trim())
                .map_err(|e| SftpError::InvalidEncoding {
                    encoding: encoding.as_str().to_string(),
                    message: e.to_string(),
                })?
        }
    };
    fs.write(path, &bytes).await
}

/// Copy a remote file to the local filesystem
pub async fn download(fs: &dyn RemoteFs, remote: &str, local: &Path) -> Result<u64, SftpError> {
    check_path(remote)?;
    let bytes = fs.read(remote).await?;
    tokio::fs::write(local, &bytes).await?;
    info!("Downloaded {} -> {} ({} bytes)", remote, local.display(), bytes.len());
    Ok(bytes.len() as u64)
}

/// Copy a local file to the remote host
pub async fn upload(fs: &dyn RemoteFs, local: &Path, remote: &str) -> Result<u64, SftpError> {
    check_path(remote)?;
    let bytes = tokio::fs::read(local).await?;
    fs.write(remote, &bytes).await?;
    info!("Uploaded {} -> {} ({} bytes)", local.display(), remote, bytes.len());
    Ok(bytes.len() as u64)
}
