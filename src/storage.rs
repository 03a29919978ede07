//! Durable writes for key material and delivered secrets.

use crate::error::{BootError, BootResult};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tokio::io::AsyncWriteExt;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// Owner read/write only.
pub const PRIVATE_MODE: u32 = 0o600;
/// World readable, owner writable.
pub const PUBLIC_MODE: u32 = 0o644;

/// Write `data` to `path` with the given permission bits, creating parent
/// directories. An existing file is truncated and its mode reset.
pub fn write_file(path: &Path, data: &[u8], mode: u32) -> BootResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BootError::storage(parent, e))?;
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(mode);

    let mut file = options.open(path).map_err(|e| BootError::storage(path, e))?;

    // `mode` only applies on creation
    #[cfg(unix)]
    file.set_permissions(fs::Permissions::from_mode(mode))
        .map_err(|e| BootError::storage(path, e))?;

    file.write_all(data).map_err(|e| BootError::storage(path, e))?;
    file.sync_all().map_err(|e| BootError::storage(path, e))?;
    Ok(())
}

/// Replace `path` atomically: write a private sibling temp file, then rename
/// it over. The temp file is removed if either step fails.
pub async fn write_atomic(path: &Path, data: &[u8]) -> BootResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| BootError::storage(parent, e))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| {
            BootError::storage(path, io::Error::new(io::ErrorKind::InvalidInput, "no file name"))
        })?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.tmp.{}", file_name, uuid::Uuid::new_v4()));

    if let Err(e) = write_private(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(BootError::storage(&tmp, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(BootError::storage(path, e));
    }
    Ok(())
}

async fn write_private(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(PRIVATE_MODE);

    let mut file = options.open(path).await?;
    file.write_all(data).await?;
    file.sync_all().await
}
