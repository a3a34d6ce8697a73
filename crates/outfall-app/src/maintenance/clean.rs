//! Move misclassified success artifacts out of the crawl tree.
//!
//! Older runs stored "no data" replies under success names. Such files carry a
//! checkpoint entry, so a harvest would never revisit them. Cleaning drops the
//! entry first and only then moves the file, so an interruption between the
//! two steps leaves a key that is simply fetched again.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::constants::ARTIFACT_SNIFF_BYTES;
use crate::harvest::artifact::{self, ArtifactError};
use crate::harvest::key::{CheckpointScope, KeyFragment, Stage, WorkKey};
use crate::harvest::{CheckpointStore, NoDataMarkers};
use crate::paths::{AppPaths, ArtifactLayout};

use super::MaintenanceError;

const TEMP_PREFIX: &str = ".outfall-";
const TEMP_SUFFIX: &str = ".part";

/// A success artifact whose leading bytes contain a no-data marker.
#[derive(Debug, Clone, Serialize)]
pub struct Misclassified {
    pub stage: Stage,
    pub path: PathBuf,
    pub marker: String,
    /// `None` when the path does not follow the artifact layout; such files are
    /// moved without touching any checkpoint.
    #[serde(skip)]
    pub key: Option<WorkKey>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanPlan {
    pub scanned: usize,
    pub misclassified: Vec<Misclassified>,
    /// Leftover temp files of interrupted atomic writes.
    pub stale_temp_files: Vec<PathBuf>,
}

impl CleanPlan {
    pub fn is_empty(&self) -> bool {
        self.misclassified.is_empty() && self.stale_temp_files.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.misclassified.len() + self.stale_temp_files.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanSummary {
    pub moved: usize,
    pub checkpoint_entries_removed: usize,
    pub temp_files_removed: usize,
}

/// Walk the success trees of both stages and collect what `apply` would touch.
pub async fn scan(paths: &AppPaths, markers: &NoDataMarkers) -> Result<CleanPlan, MaintenanceError> {
    let mut plan = CleanPlan::default();

    for stage in [Stage::Facilities, Stage::Dmr] {
        let layout = paths.layout(stage);
        for path in walk_files(layout.root(), true)? {
            if is_temp_file(&path) {
                plan.stale_temp_files.push(path);
                continue;
            }
            if path.extension().is_none_or(|ext| ext != "csv") {
                continue;
            }
            plan.scanned += 1;
            if let Some(entry) = inspect(&layout, &path, markers).await? {
                plan.misclassified.push(entry);
            }
        }
    }

    for path in walk_files(&paths.checkpoint_dir(), false)? {
        if is_temp_file(&path) {
            plan.stale_temp_files.push(path);
        }
    }

    debug!(
        scanned = plan.scanned,
        misclassified = plan.misclassified.len(),
        stale_temp_files = plan.stale_temp_files.len(),
        "clean scan finished"
    );
    Ok(plan)
}

/// Execute a plan produced by [`scan`]. Must not run concurrently with a
/// harvest over the same data directory.
pub async fn apply(paths: &AppPaths, plan: &CleanPlan) -> Result<CleanSummary, MaintenanceError> {
    let mut summary = CleanSummary::default();

    let mut by_scope: HashMap<CheckpointScope, HashSet<KeyFragment>> = HashMap::new();
    for entry in &plan.misclassified {
        if let Some(key) = &entry.key {
            by_scope.entry(key.scope()).or_default().insert(key.fragment());
        }
    }
    for (scope, fragments) in &by_scope {
        let path = paths.checkpoint_path(scope);
        let removed =
            CheckpointStore::remove_fragments(&path, scope.fragment_kind(), fragments).await?;
        info!(scope = %scope, removed, "checkpoint entries dropped");
        summary.checkpoint_entries_removed += removed;
    }

    for entry in &plan.misclassified {
        let target = trash_path(paths, &entry.path)?;
        artifact::move_artifact(&entry.path, &target).await?;
        info!(
            stage = %entry.stage,
            from = %entry.path.display(),
            to = %target.display(),
            marker = %entry.marker,
            "moved misclassified artifact to trash"
        );
        summary.moved += 1;
    }

    for path in &plan.stale_temp_files {
        match tokio::fs::remove_file(path).await {
            Ok(()) => summary.temp_files_removed += 1,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(MaintenanceError::RemoveTemp {
                    path: path.clone(),
                    source,
                });
            }
        }
    }

    Ok(summary)
}

async fn inspect(
    layout: &ArtifactLayout,
    path: &Path,
    markers: &NoDataMarkers,
) -> Result<Option<Misclassified>, ArtifactError> {
    let head = artifact::read_head(path, ARTIFACT_SNIFF_BYTES).await?;
    let Some(marker) = markers.find(&head) else {
        return Ok(None);
    };
    let key = layout.key_for_success_path(path);
    if key.is_none() {
        warn!(path = %path.display(), "misclassified file does not map to a work key");
    }
    Ok(Some(Misclassified {
        stage: layout.stage(),
        path: path.to_path_buf(),
        marker: marker.to_string(),
        key,
    }))
}

/// Regular files under `root` in file-name order. With `skip_quarantine` the
/// stage's quarantine tree is not entered.
fn walk_files(root: &Path, skip_quarantine: bool) -> Result<Vec<PathBuf>, MaintenanceError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            !(skip_quarantine
                && entry.depth() == 1
                && entry.file_name() == ArtifactLayout::QUARANTINE_DIR)
        });
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(TEMP_PREFIX) && name.ends_with(TEMP_SUFFIX))
}

fn trash_path(paths: &AppPaths, path: &Path) -> Result<PathBuf, MaintenanceError> {
    let relative = path
        .strip_prefix(paths.data_dir())
        .map_err(|_| MaintenanceError::OutsideDataDir {
            path: path.to_path_buf(),
        })?;
    Ok(paths.trash_dir().join(relative))
}
