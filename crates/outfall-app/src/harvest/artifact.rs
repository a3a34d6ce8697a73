//! Atomic artifact writes and moves.
//!
//! Payloads are written to a hidden temp file in the destination directory
//! and renamed into place, so a crash never leaves a truncated file under a
//! final artifact name.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

#[cfg(unix)]
const ARTIFACT_MODE: u32 = 0o644;

/// Durability policy for filesystem writes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum DurableWrite {
    /// No explicit fsync.
    None,
    /// Fsync the file before it is renamed into place.
    #[default]
    FileOnly,
    /// Fsync the file and its parent directory after the rename.
    FileAndDir,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("artifact path {path} has no parent directory")]
    NoParent { path: PathBuf },
}

/// Replace `path` with `payload`, creating parent directories as needed.
pub async fn write_atomic(
    path: &Path,
    payload: &[u8],
    durability: DurableWrite,
) -> Result<u64, ArtifactError> {
    let parent = parent_dir(path)?;
    fs::create_dir_all(parent)
        .await
        .map_err(|source| ArtifactError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;

    let write_err = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };
    let temp = tempfile::Builder::new()
        .prefix(".outfall-")
        .suffix(".part")
        .tempfile_in(parent)
        .map_err(write_err)?;

    let mut file = fs::File::from_std(temp.reopen().map_err(write_err)?);
    file.write_all(payload).await.map_err(write_err)?;
    file.flush().await.map_err(write_err)?;
    if durability != DurableWrite::None {
        file.sync_all().await.map_err(write_err)?;
    }
    drop(file);
    share_read_access(temp.as_file()).map_err(write_err)?;

    temp.persist(path).map_err(|err| write_err(err.error))?;

    if durability == DurableWrite::FileAndDir {
        fsync_dir(parent).await;
    }
    Ok(payload.len() as u64)
}

/// Move an artifact, creating the destination directory. Falls back to
/// copy and delete when the rename crosses filesystems.
pub async fn move_artifact(from: &Path, to: &Path) -> Result<(), ArtifactError> {
    let parent = parent_dir(to)?;
    fs::create_dir_all(parent)
        .await
        .map_err(|source| ArtifactError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;

    let move_err = |source| ArtifactError::Move {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    match fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to).await.map_err(move_err)?;
            fs::remove_file(from).await.map_err(move_err)
        }
        Err(err) => Err(move_err(err)),
    }
}

/// Read at most `limit` leading bytes of a file.
pub async fn read_head(path: &Path, limit: usize) -> Result<Vec<u8>, ArtifactError> {
    let read_err = |source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = fs::File::open(path).await.map_err(read_err)?;
    let mut head = Vec::with_capacity(limit);
    file.take(limit as u64)
        .read_to_end(&mut head)
        .await
        .map_err(read_err)?;
    Ok(head)
}

/// Temp files start out owner-only; artifacts are readable by everyone.
#[cfg(unix)]
fn share_read_access(file: &std::fs::File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(ARTIFACT_MODE))
}

#[cfg(not(unix))]
fn share_read_access(_file: &std::fs::File) -> io::Result<()> {
    Ok(())
}

fn parent_dir(path: &Path) -> Result<&Path, ArtifactError> {
    path.parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .ok_or_else(|| ArtifactError::NoParent {
            path: path.to_path_buf(),
        })
}

async fn fsync_dir(dir: &Path) {
    // Directory fsync is best-effort; some platforms don't support it.
    match fs::File::open(dir).await {
        Ok(handle) => {
            if let Err(err) = handle.sync_all().await {
                tracing::warn!(dir = %dir.display(), error = %err, "directory fsync failed");
            }
        }
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "failed to open directory for fsync");
        }
    }
}
