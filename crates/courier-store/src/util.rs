//! Shared filesystem plumbing for the stores.

use courier_types::BusError;
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub(crate) fn storage_err(context: &str, error: impl std::fmt::Display) -> BusError {
    BusError::Storage(format!("{context}: {error}"))
}

/// Reject names that would escape the store root or collide with the
/// store's own bookkeeping files.
pub(crate) fn safe_component(name: &str) -> Result<(), BusError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains("..")
    {
        return Err(BusError::Storage(format!(
            "name is not filesystem-safe: {name}"
        )));
    }
    Ok(())
}

/// Create the root directory and take the advisory exclusive lock that
/// keeps a second process off the same data directory.
pub(crate) fn open_root(root: &Path) -> Result<File, BusError> {
    std::fs::create_dir_all(root).map_err(|e| storage_err("create store root", e))?;
    let lock_path = root.join(".lock");
    let lock = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .map_err(|e| storage_err("open lock file", e))?;
    lock.try_lock_exclusive().map_err(|_| {
        BusError::Storage(format!(
            "store root is locked by another process: {}",
            root.display()
        ))
    })?;
    Ok(lock)
}

/// Serialize `value` and atomically replace `path` with it.
pub(crate) async fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<(), BusError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| storage_err("serialize record", e))?;
    let tmp = tmp_path(path);

    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| storage_err("create temp file", e))?;
    file.write_all(&bytes)
        .await
        .map_err(|e| storage_err("write temp file", e))?;
    file.sync_all()
        .await
        .map_err(|e| storage_err("sync temp file", e))?;
    drop(file);

    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| storage_err("replace record", e))
}

/// Read and deserialize the document at `path`.
pub(crate) async fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T, BusError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| storage_err("read record", e))?;
    serde_json::from_slice(&bytes).map_err(|e| storage_err("parse record", e))
}

pub(crate) fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Whether a directory entry is one of our JSON documents (and not a
/// temporary file or the lock file).
pub(crate) fn is_document(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}
