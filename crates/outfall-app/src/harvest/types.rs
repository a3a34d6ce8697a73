use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::harvest::artifact::ArtifactError;
use crate::harvest::checkpoint::CheckpointError;
use crate::harvest::fetch::FetchError;
use crate::harvest::keyspace::KeySpaceError;
use crate::harvest::preempt::PreemptError;
use crate::harvest::query::QueryError;

/// Error type shared across the harvest pipeline.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    KeySpace(#[from] KeySpaceError),
    #[error(transparent)]
    Preempt(#[from] PreemptError),
    #[error("failed to inspect {path}: {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of one harvest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum HarvestState {
    Init,
    Iterating,
    Draining,
    Done,
}

/// What happened to a single key during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDisposition {
    SkippedCheckpoint,
    SkippedArtifact,
    SkippedQuarantined,
    Stored,
    Quarantined,
    Failed,
}

/// Final summary produced after a run exhausts its key space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarvestSummary {
    pub enumerated: usize,
    pub skipped_checkpoint: usize,
    pub skipped_artifact: usize,
    pub skipped_quarantined: usize,
    pub stored: usize,
    pub quarantined: usize,
    pub failed: usize,
}

impl HarvestSummary {
    pub fn record(&mut self, disposition: KeyDisposition) {
        self.enumerated += 1;
        match disposition {
            KeyDisposition::SkippedCheckpoint => self.skipped_checkpoint += 1,
            KeyDisposition::SkippedArtifact => self.skipped_artifact += 1,
            KeyDisposition::SkippedQuarantined => self.skipped_quarantined += 1,
            KeyDisposition::Stored => self.stored += 1,
            KeyDisposition::Quarantined => self.quarantined += 1,
            KeyDisposition::Failed => self.failed += 1,
        }
    }

    /// Keys that were already finished before this run.
    pub fn already_done(&self) -> usize {
        self.skipped_checkpoint + self.skipped_artifact + self.skipped_quarantined
    }

    /// Keys that issued a request during this run.
    pub fn fetched(&self) -> usize {
        self.stored + self.quarantined + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_every_disposition_once() {
        let mut summary = HarvestSummary::default();
        for disposition in [
            KeyDisposition::SkippedCheckpoint,
            KeyDisposition::Stored,
            KeyDisposition::Quarantined,
            KeyDisposition::Failed,
            KeyDisposition::SkippedArtifact,
            KeyDisposition::SkippedQuarantined,
        ] {
            summary.record(disposition);
        }
        assert_eq!(summary.enumerated, 6);
        assert_eq!(summary.fetched(), 3);
        assert_eq!(summary.already_done(), 3);
    }
}
