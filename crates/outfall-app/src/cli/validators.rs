use crate::harvest::key::RegionCode;

/// Validate a region argument: two ASCII letters, case-insensitive.
pub fn validate_region(s: &str) -> Result<RegionCode, String> {
    s.trim()
        .parse::<RegionCode>()
        .map_err(|err| format!("{err} (expected a two-letter code such as OH)"))
}
