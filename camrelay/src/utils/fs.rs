//! Filesystem helpers for the ephemeral output store.
//!
//! Every helper attaches the operation and path to IO errors so failures
//! in log lines point at the directory that caused them.

use std::path::Path;

use crate::{Error, Result};

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| Error::io_path(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| Error::io_path(op, path, e))
}

/// Remove a directory tree, treating an already-missing directory as success.
pub async fn remove_dir_all_if_exists(op: &'static str, path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_path(op, path, e)),
    }
}

/// Replace `path` with a fresh, empty directory.
pub async fn reset_dir(op: &'static str, path: &Path) -> Result<()> {
    remove_dir_all_if_exists(op, path).await?;
    ensure_dir_all_with_op(op, path).await
}

/// Whether a regular file exists at `path`.
///
/// Errors other than "not found" (e.g. permissions) count as absent: the
/// caller polls again or reports the file as missing.
pub async fn file_exists(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.is_file(),
        Err(_) => false,
    }
}
