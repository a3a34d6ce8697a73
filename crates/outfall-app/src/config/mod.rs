//! Configuration loading and XDG path helpers.
//!
//! Sources are layered from lowest to highest precedence: built-in defaults,
//! `/etc/outfall/settings.toml` (directory overridable through
//! `OUTFALL_ETC_CONFIG_DIR`), `$XDG_CONFIG_HOME/outfall/settings.toml`,
//! `./config/settings.toml`, the file named by `OUTFALL_CONFIG_FILE`, and
//! finally `OUTFALL__SECTION__KEY` environment variables.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::constants::{
    APP_NAME, DEFAULT_FIRST_YEAR, DEFAULT_LAST_YEAR, DEFAULT_LISTING_ID_COLUMN,
    DEFAULT_LISTING_PREAMBLE_LINES, DEFAULT_NO_DATA_MARKERS, DEFAULT_REGIONS,
    DEFAULT_SERVICE_BASE_URL, DEFAULT_USER_AGENT, DMR_ENDPOINT, FACILITY_ENDPOINT,
};
use crate::harvest::artifact::DurableWrite;
use crate::harvest::key::{KeyError, RegionCode, YEAR_RANGE};
use crate::harvest::listing::ListingOptions;
use crate::harvest::preempt::PreemptSignal;
use crate::harvest::query::{QueryError, validate_date_format};
use crate::harvest::router::NoDataPolicy;
use crate::harvest::throttle::{DelayRange, ThrottleError, delay_from_secs};

const LOCAL_CONFIG_FILE: &str = "config/settings";
const ENV_PREFIX: &str = "OUTFALL";
const ETC_DIR_VAR: &str = "OUTFALL_ETC_CONFIG_DIR";
const OVERRIDE_FILE_VAR: &str = "OUTFALL_CONFIG_FILE";

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("unable to resolve project directories")]
    MissingProjectDirs,
    #[error(transparent)]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("invalid configuration value for `{field}`: {source}")]
    Region {
        field: &'static str,
        #[source]
        source: KeyError,
    },
    #[error("invalid configuration value for `{field}`: {source}")]
    Delay {
        field: &'static str,
        #[source]
        source: ThrottleError,
    },
    #[error(transparent)]
    Query(#[from] QueryError),
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub storage: StorageConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub listing: ListingConfig,
    #[serde(default)]
    pub preemption: PreemptionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of artifacts, checkpoints, logs and trash.
    pub data_dir: PathBuf,
    #[serde(default)]
    pub durability: DurableWrite,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HarvestConfig {
    pub first_year: i32,
    pub last_year: i32,
    pub regions: Vec<String>,
    pub facility_no_data: NoDataPolicy,
    pub permit_no_data: NoDataPolicy,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            first_year: DEFAULT_FIRST_YEAR,
            last_year: DEFAULT_LAST_YEAR,
            regions: DEFAULT_REGIONS.iter().map(|r| r.to_string()).collect(),
            facility_no_data: NoDataPolicy::SkipIfQuarantined,
            permit_no_data: NoDataPolicy::Retry,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub base_url: String,
    pub facility_endpoint: String,
    pub dmr_endpoint: String,
    /// Sent as `p_ipaddr` when set.
    pub client_ip: Option<String>,
    pub user_agent: String,
    /// chrono strftime pattern for DMR start/end dates.
    pub date_format: String,
    pub request_timeout_secs: u64,
    pub no_data_markers: Vec<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVICE_BASE_URL.to_string(),
            facility_endpoint: FACILITY_ENDPOINT.to_string(),
            dmr_endpoint: DMR_ENDPOINT.to_string(),
            client_ip: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            date_format: "%m/%d/%Y".to_string(),
            request_timeout_secs: 120,
            no_data_markers: DEFAULT_NO_DATA_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}

impl ServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ThrottleConfig {
    pub pre_request: DelayRange,
    pub post_request: DelayRange,
    pub failure_cooldown_secs: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            pre_request: DelayRange {
                min_secs: 3.0,
                max_secs: 10.0,
            },
            post_request: DelayRange {
                min_secs: 10.0,
                max_secs: 30.0,
            },
            failure_cooldown_secs: 30.0,
        }
    }
}

impl ThrottleConfig {
    pub fn failure_cooldown(&self) -> Duration {
        delay_from_secs(self.failure_cooldown_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ListingConfig {
    pub preamble_lines: usize,
    pub id_column: String,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            preamble_lines: DEFAULT_LISTING_PREAMBLE_LINES,
            id_column: DEFAULT_LISTING_ID_COLUMN.to_string(),
        }
    }
}

impl ListingConfig {
    pub fn options(&self) -> ListingOptions {
        ListingOptions::builder()
            .preamble_lines(self.preamble_lines)
            .id_column(self.id_column.clone())
            .build()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct PreemptionConfig {
    pub signal: PreemptSignal,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Daily log files kept before the oldest is deleted.
    pub max_log_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { max_log_files: 30 }
    }
}

impl AppConfig {
    /// Defaults rooted at `data_dir`, for embedding and tests.
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            storage: StorageConfig {
                data_dir: data_dir.into(),
                durability: DurableWrite::default(),
            },
            harvest: HarvestConfig::default(),
            service: ServiceConfig::default(),
            throttle: ThrottleConfig::default(),
            listing: ListingConfig::default(),
            preemption: PreemptionConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Reject settings a harvest cannot run with.
    pub fn validate(&self) -> Result<(), AppConfigError> {
        for (field, year) in [
            ("harvest.first_year", self.harvest.first_year),
            ("harvest.last_year", self.harvest.last_year),
        ] {
            if !YEAR_RANGE.contains(&year) {
                return Err(AppConfigError::Invalid(format!(
                    "{field} {year} is not a four-digit year"
                )));
            }
        }
        if self.harvest.first_year > self.harvest.last_year {
            return Err(AppConfigError::Invalid(format!(
                "harvest.first_year {} is after harvest.last_year {}",
                self.harvest.first_year, self.harvest.last_year
            )));
        }
        self.regions()?;
        self.throttle
            .pre_request
            .validate()
            .map_err(|source| AppConfigError::Delay {
                field: "throttle.pre_request",
                source,
            })?;
        self.throttle
            .post_request
            .validate()
            .map_err(|source| AppConfigError::Delay {
                field: "throttle.post_request",
                source,
            })?;
        DelayRange::new(
            self.throttle.failure_cooldown_secs,
            self.throttle.failure_cooldown_secs,
        )
        .map_err(|source| AppConfigError::Delay {
            field: "throttle.failure_cooldown_secs",
            source,
        })?;
        if self.service.request_timeout_secs == 0 {
            return Err(AppConfigError::Invalid(
                "service.request_timeout_secs must be at least 1".to_string(),
            ));
        }
        validate_date_format(&self.service.date_format)?;
        Ok(())
    }

    /// Configured regions, parsed and in configured order.
    pub fn regions(&self) -> Result<Vec<RegionCode>, AppConfigError> {
        if self.harvest.regions.is_empty() {
            return Err(AppConfigError::Invalid(
                "harvest.regions must list at least one region".to_string(),
            ));
        }
        self.harvest
            .regions
            .iter()
            .map(|raw| {
                raw.parse().map_err(|source| AppConfigError::Region {
                    field: "harvest.regions",
                    source,
                })
            })
            .collect()
    }

    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.harvest.first_year..=self.harvest.last_year
    }
}

pub fn load() -> Result<AppConfig, AppConfigError> {
    let default_data = default_data_dir()?;
    let mut builder = Config::builder().set_default(
        "storage.data_dir",
        default_data.to_string_lossy().to_string(),
    )?;

    for path in layered_config_files() {
        builder = builder.add_source(
            File::from(path)
                .format(FileFormat::Toml)
                .required(false),
        );
    }
    builder = builder.add_source(File::with_name(LOCAL_CONFIG_FILE).required(false));
    if let Some(path) = env::var_os(OVERRIDE_FILE_VAR) {
        builder = builder.add_source(File::from(PathBuf::from(path)).format(FileFormat::Toml));
    }

    let cfg: AppConfig = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("harvest.regions")
                .with_list_parse_key("service.no_data_markers")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn project_dirs() -> Result<ProjectDirs, AppConfigError> {
    ProjectDirs::from("gov", "epa-echo", APP_NAME).ok_or(AppConfigError::MissingProjectDirs)
}

fn default_data_dir() -> Result<PathBuf, AppConfigError> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

/// System-wide then per-user settings files, lowest precedence first.
fn layered_config_files() -> Vec<PathBuf> {
    let etc_root = env::var_os(ETC_DIR_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc"));
    let mut files = vec![settings_file(&etc_root.join(APP_NAME))];
    if let Ok(dirs) = project_dirs() {
        files.push(settings_file(dirs.config_dir()));
    }
    files
}

fn settings_file(dir: &Path) -> PathBuf {
    dir.join("settings.toml")
}
