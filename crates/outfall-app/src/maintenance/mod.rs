//! Offline inspection and repair of a data directory.

pub mod audit;
pub mod clean;

pub use audit::{AuditReport, FacilityGap, PermitGap, YearCoverage, audit};
pub use clean::{CleanPlan, CleanSummary, Misclassified};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::harvest::CheckpointError;
use crate::harvest::artifact::ArtifactError;

#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error("failed to walk data directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("failed to remove stale temp file {path}: {source}")]
    RemoveTemp {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{path} is outside the data directory")]
    OutsideDataDir { path: PathBuf },
}
