//! Application-level error type shared by the binary and maintenance commands.

use inquire::InquireError;
use thiserror::Error;

use crate::config;
use crate::harvest::HarvestError;
use crate::harvest::key::RegionCode;
use crate::logging::LoggingError;
use crate::maintenance::MaintenanceError;
use crate::paths::PathError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    ConfigLoad(#[from] config::AppConfigError),
    #[error(transparent)]
    Paths(#[from] PathError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error(transparent)]
    Harvest(#[from] HarvestError),
    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("region {region} is not in the configured region list")]
    UnknownRegion { region: RegionCode },
    #[error("clean cancelled; {pending} artifacts left in place")]
    CleanConfirmationCancelled { pending: usize },
    #[error("confirmation token mismatch; {pending} artifacts left in place")]
    CleanConfirmationRejected { pending: usize },
    #[error("failed to read clean confirmation input: {source}")]
    CleanPromptFailed {
        #[source]
        source: InquireError,
    },
}
