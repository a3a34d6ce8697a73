//! Append-only checkpoint ledger of finished work keys.
//!
//! Each scope owns one newline-delimited text file with one key fragment per
//! line. The in-memory set mirrors the file and is only extended after the
//! corresponding line has been synced.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::harvest::artifact::{self, ArtifactError, DurableWrite};
use crate::harvest::key::{FragmentKind, KeyFragment};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open checkpoint {path} for append: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to append to checkpoint {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("fragment `{fragment}` does not belong to checkpoint {path}")]
    WrongKind { path: PathBuf, fragment: String },
    #[error("failed to rewrite checkpoint: {0}")]
    Rewrite(#[from] ArtifactError),
}

/// Durable record of the finished keys of one checkpoint scope.
///
/// A store assumes it is the only writer of its file.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    kind: FragmentKind,
    done: HashSet<KeyFragment>,
    file: File,
}

impl CheckpointStore {
    /// Load the existing entries at `path` (a missing file is empty) and open
    /// it for appending. Parent directories are created.
    pub async fn open<P: AsRef<Path>>(path: P, kind: FragmentKind) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CheckpointError::Open {
                    path: path.clone(),
                    source,
                })?;
        }

        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(source) => return Err(CheckpointError::Read { path, source }),
        };
        let parsed = parse_entries(&path, &contents, kind);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| CheckpointError::Open {
                path: path.clone(),
                source,
            })?;
        if parsed.torn_tail {
            let open_err = |source| CheckpointError::Open {
                path: path.clone(),
                source,
            };
            file.set_len(complete_len(&contents) as u64)
                .await
                .map_err(open_err)?;
            file.sync_data().await.map_err(open_err)?;
        }

        debug!(
            path = %path.display(),
            entries = parsed.done.len(),
            "loaded checkpoint"
        );

        Ok(Self {
            path,
            kind,
            done: parsed.done,
            file,
        })
    }

    pub fn contains(&self, fragment: &KeyFragment) -> bool {
        self.done.contains(fragment)
    }

    /// Record a finished key. The line is flushed and synced before this
    /// returns; re-appending a recorded fragment is a no-op.
    pub async fn append(&mut self, fragment: KeyFragment) -> Result<(), CheckpointError> {
        if fragment.kind() != self.kind {
            return Err(CheckpointError::WrongKind {
                path: self.path.clone(),
                fragment: fragment.to_string(),
            });
        }
        if self.done.contains(&fragment) {
            return Ok(());
        }

        let line = format!("{fragment}\n");

        let append_err = |source| CheckpointError::Append {
            path: self.path.clone(),
            source,
        };
        self.file
            .write_all(line.as_bytes())
            .await
            .map_err(append_err)?;
        self.file.flush().await.map_err(append_err)?;
        self.file.sync_data().await.map_err(append_err)?;

        self.done.insert(fragment);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop `fragments` from the checkpoint at `path` by atomically replacing
    /// the file. Only for out-of-band maintenance while no harvest runs.
    /// Returns the number of removed lines.
    pub async fn remove_fragments(
        path: &Path,
        kind: FragmentKind,
        fragments: &HashSet<KeyFragment>,
    ) -> Result<usize, CheckpointError> {
        let contents = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let text = String::from_utf8_lossy(&contents);
        let mut kept = String::with_capacity(text.len());
        let mut removed = 0;
        for line in complete_lines(&text) {
            let drop_line = KeyFragment::parse(kind, line)
                .map(|fragment| fragments.contains(&fragment))
                .unwrap_or(false);
            if drop_line {
                removed += 1;
                continue;
            }
            kept.push_str(line);
            kept.push('\n');
        }

        if removed > 0 {
            artifact::write_atomic(path, kept.as_bytes(), DurableWrite::FileAndDir).await?;
        }
        Ok(removed)
    }
}

struct ParsedEntries {
    done: HashSet<KeyFragment>,
    torn_tail: bool,
}

fn parse_entries(path: &Path, contents: &[u8], kind: FragmentKind) -> ParsedEntries {
    let text = String::from_utf8_lossy(contents);
    let torn_tail = !text.is_empty() && !text.ends_with('\n');
    if torn_tail {
        let tail = text.rsplit('\n').next().unwrap_or_default();
        warn!(
            path = %path.display(),
            line = tail,
            "truncating unterminated checkpoint line from an interrupted write"
        );
    }

    let mut done = HashSet::new();
    for line in complete_lines(&text) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match KeyFragment::parse(kind, trimmed) {
            Ok(fragment) => {
                done.insert(fragment);
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring invalid checkpoint line");
            }
        }
    }
    ParsedEntries { done, torn_tail }
}

/// Newline-terminated lines; an unterminated tail is excluded.
fn complete_lines(text: &str) -> std::str::Lines<'_> {
    text[..complete_len(text.as_bytes())].lines()
}

fn complete_len(contents: &[u8]) -> usize {
    contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |idx| idx + 1)
}
