//! Filesystem layout (XDG-aware) for artifacts, checkpoints, logs and trash.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use thiserror::Error;

use crate::harvest::key::{CheckpointScope, RegionCode, Stage, WorkKey, parse_year};

#[derive(Debug, Error)]
pub enum PathError {
    #[error("unable to determine project directories")]
    MissingProjectDirs,
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Container providing filesystem paths for the application. In production this is
/// rooted at `$XDG_DATA_HOME/outfall`; tests may construct custom instances.
#[derive(Debug, Clone)]
pub struct AppPaths {
    base_dir: PathBuf,
}

impl AppPaths {
    /// Construct paths rooted under `$XDG_DATA_HOME/outfall`.
    pub fn from_project_dirs() -> Result<Self, PathError> {
        let dirs = ProjectDirs::from("gov", "epa-echo", crate::constants::APP_NAME)
            .ok_or(PathError::MissingProjectDirs)?;
        Self::new(dirs.data_dir())
    }

    /// Construct paths rooted under the provided directory, ensuring it exists.
    pub fn new<P: AsRef<Path>>(base: P) -> Result<Self, PathError> {
        let base = base.as_ref().to_path_buf();
        ensure_dir(&base)?;
        Ok(Self { base_dir: base })
    }

    pub fn data_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Root of a stage's artifacts (`.../facilities`, `.../dmr`).
    pub fn stage_root(&self, stage: Stage) -> PathBuf {
        self.base_dir.join(stage.slug())
    }

    /// Checkpoint directory (`.../checkpoints`).
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.base_dir.join("checkpoints")
    }

    /// Checkpoint file of one scope (`.../checkpoints/{stage}/{file}`).
    pub fn checkpoint_path(&self, scope: &CheckpointScope) -> PathBuf {
        self.checkpoint_dir()
            .join(scope.stage().slug())
            .join(scope.file_name())
    }

    /// Rotating log directory (`.../logs`), created on demand.
    pub fn log_dir(&self) -> Result<PathBuf, PathError> {
        ensure_dir(&self.base_dir.join("logs"))
    }

    /// Holding area for artifacts removed by maintenance (`.../trash`).
    pub fn trash_dir(&self) -> PathBuf {
        self.base_dir.join("trash")
    }

    pub fn layout(&self, stage: Stage) -> ArtifactLayout {
        ArtifactLayout::new(stage, self.stage_root(stage))
    }
}

/// Pure mapping from work keys to artifact paths within one stage root.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    stage: Stage,
    root: PathBuf,
}

impl ArtifactLayout {
    pub const QUARANTINE_DIR: &'static str = "error_html";

    pub fn new<P: Into<PathBuf>>(stage: Stage, root: P) -> Self {
        Self {
            stage,
            root: root.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a usable payload for `key` lives.
    pub fn success_path(&self, key: &WorkKey) -> PathBuf {
        let year = key.year().to_string();
        let region = key.region().as_str();
        match key.entity_id() {
            None => self
                .root
                .join(region)
                .join(format!("{year}_{region}.csv")),
            Some(id) => self
                .root
                .join(&year)
                .join(region)
                .join(format!("{id}.csv")),
        }
    }

    /// Where a no-data reply for `key` is kept for review.
    pub fn quarantine_path(&self, key: &WorkKey) -> PathBuf {
        let year = key.year().to_string();
        let region = key.region().as_str();
        let name = match key.entity_id() {
            None => format!("{year}_{region}.html"),
            Some(id) => format!("{id}.html"),
        };
        self.root
            .join(Self::QUARANTINE_DIR)
            .join(&year)
            .join(region)
            .join(name)
    }

    /// Inverse of [`Self::success_path`]; `None` for anything that is not a
    /// success artifact of this stage.
    pub fn key_for_success_path(&self, path: &Path) -> Option<WorkKey> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        match (self.stage, parts.as_slice()) {
            (Stage::Facilities, [region_dir, file]) => {
                let region: RegionCode = region_dir.parse().ok()?;
                let stem = file.strip_suffix(".csv")?;
                let (year, file_region) = stem.split_once('_')?;
                if file_region != region.as_str() || *region_dir != region.as_str() {
                    return None;
                }
                Some(WorkKey::facility(parse_year(year).ok()?, region))
            }
            (Stage::Dmr, [year, region_dir, file]) => {
                let region: RegionCode = region_dir.parse().ok()?;
                if *region_dir != region.as_str() {
                    return None;
                }
                let id = file.strip_suffix(".csv")?.parse().ok()?;
                Some(WorkKey::permit(parse_year(year).ok()?, region, id))
            }
            _ => None,
        }
    }

    /// Directory holding a region's facility listings.
    pub fn listing_dir(&self, region: &RegionCode) -> PathBuf {
        self.root.join(region.as_str())
    }

    /// Directory holding one region's permit artifacts for a year.
    pub fn permit_dir(&self, year: i32, region: &RegionCode) -> PathBuf {
        self.root.join(year.to_string()).join(region.as_str())
    }
}

fn ensure_dir(path: &Path) -> Result<PathBuf, PathError> {
    if let Err(err) = fs::create_dir_all(path) {
        if err.kind() != io::ErrorKind::AlreadyExists {
            return Err(PathError::CreateDir {
                path: path.to_path_buf(),
                source: err,
            });
        }
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn oh() -> RegionCode {
        "OH".parse().expect("valid region")
    }

    #[test]
    fn facility_paths_follow_region_first_layout() {
        let layout = ArtifactLayout::new(Stage::Facilities, "/data/facilities");
        let key = WorkKey::facility(2001, oh());
        assert_eq!(
            layout.success_path(&key),
            PathBuf::from("/data/facilities/OH/2001_OH.csv")
        );
        assert_eq!(
            layout.quarantine_path(&key),
            PathBuf::from("/data/facilities/error_html/2001/OH/2001_OH.html")
        );
        assert_eq!(layout.listing_dir(&oh()), PathBuf::from("/data/facilities/OH"));
    }

    #[test]
    fn permit_paths_follow_year_first_layout() {
        let layout = ArtifactLayout::new(Stage::Dmr, "/data/dmr");
        let key = WorkKey::permit(2001, oh(), "OH0000001".parse().expect("valid id"));
        assert_eq!(
            layout.success_path(&key),
            PathBuf::from("/data/dmr/2001/OH/OH0000001.csv")
        );
        assert_eq!(
            layout.quarantine_path(&key),
            PathBuf::from("/data/dmr/error_html/2001/OH/OH0000001.html")
        );
    }

    #[test]
    fn success_paths_map_back_to_their_keys() {
        let facilities = ArtifactLayout::new(Stage::Facilities, "/data/facilities");
        let key = WorkKey::facility(2001, oh());
        assert_eq!(
            facilities.key_for_success_path(&facilities.success_path(&key)),
            Some(key.clone())
        );
        assert_eq!(
            facilities.key_for_success_path(&facilities.quarantine_path(&key)),
            None
        );
        assert_eq!(
            facilities.key_for_success_path(Path::new("/data/facilities/OH/2001_AL.csv")),
            None
        );

        let dmr = ArtifactLayout::new(Stage::Dmr, "/data/dmr");
        let key = WorkKey::permit(2001, oh(), "OH0000001".parse().expect("valid id"));
        assert_eq!(dmr.key_for_success_path(&dmr.success_path(&key)), Some(key));
        assert_eq!(
            dmr.key_for_success_path(Path::new("/data/dmr/2001/oh/OH0000001.csv")),
            None
        );
    }

    #[test]
    fn checkpoint_paths_are_split_by_stage() {
        let temp = TempDir::new().expect("temp dir");
        let paths = AppPaths::new(temp.path()).expect("app paths");
        assert_eq!(
            paths.checkpoint_path(&CheckpointScope::region(oh())),
            temp.path().join("checkpoints/facilities/OH_progress.txt")
        );
        assert_eq!(
            paths.checkpoint_path(&CheckpointScope::region_year(oh(), 2003)),
            temp.path().join("checkpoints/dmr/OH_2003_progress.txt")
        );
    }

    #[test]
    fn new_creates_the_base_directory() {
        let temp = TempDir::new().expect("temp dir");
        let base = temp.path().join("nested").join("outfall");
        let paths = AppPaths::new(&base).expect("app paths");
        assert!(base.is_dir());
        assert!(paths.log_dir().expect("log dir").is_dir());
    }
}
