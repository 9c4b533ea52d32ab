//! Filesystem helpers shared across modules.
//!
//! These helpers attach operation + path context to IO errors and provide
//! whole-file replacement for JSON records that are polled by readers while
//! a job writes them.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Sibling path used while a file is being replaced.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The data is written to a temporary sibling, synced, then renamed over the
/// target, so readers only ever see the old or the new document.
pub async fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let temp_path = temp_path_for(path);

    {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error("creating temp file", &temp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| io_error("writing temp file", &temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| io_error("syncing temp file", &temp_path, e))?;
    }

    tokio::fs::rename(&temp_path, path)
        .await
        .map_err(|e| io_error("replacing", path, e))
}

/// Read a JSON document, returning `Ok(None)` when the file does not exist.
///
/// A present but malformed file is an error, never a silent default.
pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error("reading", path, e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Async variant of [`read_json_if_exists`].
pub async fn read_json_if_exists_async<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error("reading", path, e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Reduce an arbitrary client-supplied file name to a safe single path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}
