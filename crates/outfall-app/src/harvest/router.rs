//! Persistence of classified responses and checkpoint bookkeeping.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use tracing::{error, info, warn};

use crate::harvest::artifact::{self, DurableWrite};
use crate::harvest::checkpoint::CheckpointStore;
use crate::harvest::fetch::{FetchError, ResponseOutcome};
use crate::harvest::key::WorkKey;
use crate::harvest::types::HarvestError;
use crate::paths::ArtifactLayout;

/// Whether a no-data reply finishes its key.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, EnumString, AsRefStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum NoDataPolicy {
    /// Quarantine the reply and try the key again on the next run.
    #[default]
    Retry,
    /// Quarantine the reply and record the key as finished.
    Checkpoint,
    /// Quarantine the reply without a checkpoint entry; later runs treat the
    /// quarantined artifact as finished.
    SkipIfQuarantined,
}

impl NoDataPolicy {
    /// Whether a no-data reply is appended to the checkpoint.
    pub fn checkpoints(self) -> bool {
        self == Self::Checkpoint
    }

    /// Whether an existing quarantine artifact finishes its key.
    pub fn honors_quarantine(self) -> bool {
        self == Self::SkipIfQuarantined
    }
}

/// Result of routing one outcome.
#[derive(Debug)]
pub enum RouteOutcome {
    Stored { path: PathBuf, bytes: u64 },
    Quarantined {
        path: PathBuf,
        bytes: u64,
        checkpointed: bool,
    },
    Failed(FetchError),
}

#[derive(Debug, Clone)]
pub struct ResponseRouter {
    layout: ArtifactLayout,
    no_data: NoDataPolicy,
    durability: DurableWrite,
}

impl ResponseRouter {
    pub fn new(layout: ArtifactLayout, no_data: NoDataPolicy, durability: DurableWrite) -> Self {
        Self {
            layout,
            no_data,
            durability,
        }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn no_data(&self) -> NoDataPolicy {
        self.no_data
    }

    /// Persist `outcome` for `key`. The checkpoint is appended only after the
    /// artifact is in place, and only for outcomes the policy treats as final.
    pub async fn route(
        &self,
        key: &WorkKey,
        outcome: ResponseOutcome,
        store: &mut CheckpointStore,
    ) -> Result<RouteOutcome, HarvestError> {
        match outcome {
            ResponseOutcome::Success(payload) => {
                let path = self.layout.success_path(key);
                let bytes = artifact::write_atomic(&path, &payload, self.durability).await?;
                info!(
                    key = %key,
                    bytes,
                    path = %path.display(),
                    "stored payload"
                );
                store.append(key.fragment()).await?;
                info!(key = %key, checkpoint = %store.path().display(), "checkpointed key");
                Ok(RouteOutcome::Stored { path, bytes })
            }
            ResponseOutcome::NoDataAvailable(payload) => {
                let path = self.layout.quarantine_path(key);
                let bytes = artifact::write_atomic(&path, &payload, self.durability).await?;
                let checkpointed = self.no_data.checkpoints();
                warn!(
                    key = %key,
                    bytes,
                    path = %path.display(),
                    policy = self.no_data.as_ref(),
                    "upstream has no data for key; reply quarantined"
                );
                if checkpointed {
                    store.append(key.fragment()).await?;
                }
                Ok(RouteOutcome::Quarantined {
                    path,
                    bytes,
                    checkpointed,
                })
            }
            ResponseOutcome::TransportFailure(err) => {
                error!(key = %key, error = %err, "request failed; key left pending");
                Ok(RouteOutcome::Failed(err))
            }
        }
    }
}
