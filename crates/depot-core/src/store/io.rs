//! Atomic write helpers.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tempfile::NamedTempFile;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{CacheError, CacheResult};
use crate::upstream::UpstreamBody;

/// Write `content` to `dest` via a same-directory temp file and a rename.
///
/// The temp file is flushed and fsynced before the rename. On any failure
/// before the rename the temp file is removed when it drops.
pub(crate) async fn write_atomic(dest: &Path, content: Vec<u8>) -> CacheResult<()> {
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomic_blocking(&dest, &content))
        .await
        .map_err(|e| CacheError::Io {
            message: format!("atomic write task failed: {}", e),
        })?
}

fn write_atomic_blocking(dest: &Path, content: &[u8]) -> CacheResult<()> {
    let mut temp = create_temp(dest)?;

    temp.write_all(content)
        .map_err(|e| CacheError::io("failed to write temp file", e))?;
    temp.flush()
        .map_err(|e| CacheError::io("failed to flush temp file", e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| CacheError::io("failed to fsync temp file", e))?;

    temp.persist(dest)
        .map_err(|e| CacheError::io("failed to rename temp file", e.error))?;

    Ok(())
}

/// Stream an upstream body to `dest` with the same temp-file + rename
/// guarantees as [`write_atomic`], holding one chunk in memory at a time.
///
/// Returns the number of bytes written.
pub(crate) async fn write_atomic_stream(dest: &Path, body: &mut UpstreamBody) -> CacheResult<u64> {
    let (file, temp_path) = create_temp(dest)?.into_parts();
    let mut file = fs::File::from_std(file);

    let mut written = 0u64;
    while let Some(chunk) = body.chunk().await? {
        file.write_all(&chunk)
            .await
            .map_err(|e| CacheError::io("failed to write temp file", e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| CacheError::io("failed to flush temp file", e))?;
    file.sync_all()
        .await
        .map_err(|e| CacheError::io("failed to fsync temp file", e))?;
    drop(file);

    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || temp_path.persist(&dest))
        .await
        .map_err(|e| CacheError::Io {
            message: format!("atomic write task failed: {}", e),
        })?
        .map_err(|e| CacheError::io("failed to rename temp file", e.error))?;

    Ok(written)
}

fn create_temp(dest: &Path) -> CacheResult<NamedTempFile> {
    let parent = dest.parent().ok_or_else(|| CacheError::Io {
        message: format!("destination has no parent: {}", dest.display()),
    })?;

    tempfile::Builder::new()
        .prefix(".depot-")
        .suffix(".tmp")
        .tempfile_in(parent)
        .map_err(|e| CacheError::io("failed to create temp file", e))
}

/// Ensure the parent directory of `dest` exists.
pub(crate) async fn ensure_parent(dest: &Path) -> CacheResult<PathBuf> {
    let parent = dest.parent().ok_or_else(|| CacheError::Io {
        message: format!("destination has no parent: {}", dest.display()),
    })?;
    fs::create_dir_all(parent)
        .await
        .map_err(|e| CacheError::io("failed to create cache directory", e))?;
    Ok(parent.to_path_buf())
}

/// Modification time, or `None` when the entry is absent or unreadable.
pub(crate) async fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).await.ok()?.modified().ok()
}
