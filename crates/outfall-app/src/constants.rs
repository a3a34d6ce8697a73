//! Cross-cutting application constants.

/// Application name used for XDG directories, config files and log files.
pub const APP_NAME: &str = "outfall";

/// Default root of the ECHO REST services.
pub const DEFAULT_SERVICE_BASE_URL: &str = "https://echodata.epa.gov/echo/";

/// Annual custom-data endpoint returning one facility listing per year and state.
pub const FACILITY_ENDPOINT: &str = "dmr_rest_services.get_custom_data_annual";

/// Monitoring-data endpoint returning the DMR rows of one permit.
pub const DMR_ENDPOINT: &str = "dmr_rest_services.get_monitoring_data_csv";

/// The monitoring endpoint rejects obvious non-browser clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/90.0.4430.93 Safari/537.36";

/// Number of column ids requested from the annual listing endpoint.
pub const FACILITY_QUERY_COLUMNS: u32 = 80;

/// Body fragments that mark an upstream "no data" reply served with status 200.
pub const DEFAULT_NO_DATA_MARKERS: &[&str] = &["file output failed", "<html"];

/// Listing files start with a short free-text banner before the CSV header.
pub const DEFAULT_LISTING_PREAMBLE_LINES: usize = 3;

/// Column of the annual listing that carries the permit identifier.
pub const DEFAULT_LISTING_ID_COLUMN: &str = "NPDES Permit Number";

/// Bytes of a stored artifact inspected when looking for no-data markers.
pub const ARTIFACT_SNIFF_BYTES: usize = 1500;

/// States, DC included, covered by a full crawl.
pub const DEFAULT_REGIONS: &[&str] = &[
    "AL", "AR", "AZ", "CA", "CO", "CT", "DC", "DE", "FL", "GA", "IA", "ID", "IL", "IN", "KS", "KY",
    "LA", "MA", "MD", "ME", "MI", "MN", "MO", "MS", "MT", "NC", "ND", "NE", "NH", "NJ", "NM", "NV",
    "NY", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VA", "VT", "WA", "WI", "WV",
    "WY",
];

pub const DEFAULT_FIRST_YEAR: i32 = 2000;
pub const DEFAULT_LAST_YEAR: i32 = 2025;
