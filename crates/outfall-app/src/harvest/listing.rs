//! Permit discovery from stage-one facility listings.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use bon::Builder;
use thiserror::Error;
use tracing::{debug, warn};

use crate::constants::{DEFAULT_LISTING_ID_COLUMN, DEFAULT_LISTING_PREAMBLE_LINES};
use crate::harvest::key::EntityId;

/// Layout of a facility listing file.
#[derive(Debug, Clone, Builder)]
pub struct ListingOptions {
    /// Free-text lines preceding the CSV header.
    #[builder(default = DEFAULT_LISTING_PREAMBLE_LINES)]
    pub preamble_lines: usize,
    /// Header of the column holding permit identifiers.
    #[builder(into, default = DEFAULT_LISTING_ID_COLUMN.to_string())]
    pub id_column: String,
}

impl Default for ListingOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A listing that cannot be turned into permit keys.
#[derive(Debug, Error)]
pub enum ListingError {
    #[error("failed to read listing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("listing {path} ends before its header row")]
    Truncated { path: PathBuf },
    #[error("listing {path} has no `{column}` column")]
    MissingColumn { path: PathBuf, column: String },
    #[error("malformed CSV in listing {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Read the permit identifiers of one listing in file order, without duplicates.
pub fn read_listing(path: &Path, options: &ListingOptions) -> Result<Vec<EntityId>, ListingError> {
    let raw = std::fs::read(path).map_err(|source| ListingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_listing(path, &raw, options)
}

fn parse_listing(
    path: &Path,
    raw: &[u8],
    options: &ListingOptions,
) -> Result<Vec<EntityId>, ListingError> {
    let text = String::from_utf8_lossy(raw).replace('\0', "");
    let body = skip_lines(&text, options.preamble_lines).ok_or_else(|| ListingError::Truncated {
        path: path.to_path_buf(),
    })?;
    if body.trim().is_empty() {
        return Err(ListingError::Truncated {
            path: path.to_path_buf(),
        });
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body.as_bytes());
    let headers = reader.headers().map_err(|source| ListingError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    let column = headers
        .iter()
        .position(|header| header.trim() == options.id_column)
        .ok_or_else(|| ListingError::MissingColumn {
            path: path.to_path_buf(),
            column: options.id_column.clone(),
        })?;

    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                warn!(path = %path.display(), row, error = %err, "skipping unreadable listing row");
                continue;
            }
        };
        let Some(value) = record.get(column).map(str::trim) else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        match value.parse::<EntityId>() {
            Ok(id) => {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
            Err(err) => {
                warn!(path = %path.display(), row, error = %err, "skipping invalid permit id");
            }
        }
    }

    debug!(path = %path.display(), permits = ids.len(), "parsed facility listing");
    Ok(ids)
}

fn skip_lines(text: &str, count: usize) -> Option<&str> {
    let mut rest = text;
    for _ in 0..count {
        let newline = rest.find('\n')?;
        rest = &rest[newline + 1..];
    }
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "Annual loadings\nState: OH\nGenerated 2024-01-01\n\
NPDES Permit Number,Facility Name,State\n\
OH0000001,Alpha WWTP,OH\n\
 OH0000002 ,Beta Works,OH\n\
,Missing Id,OH\n\
OH0000001,Alpha again,OH\n";

    fn parse(raw: &str) -> Result<Vec<EntityId>, ListingError> {
        parse_listing(Path::new("2000_OH.csv"), raw.as_bytes(), &ListingOptions::default())
    }

    fn ids(values: &[EntityId]) -> Vec<&str> {
        values.iter().map(EntityId::as_str).collect()
    }

    #[test]
    fn extracts_trimmed_unique_ids_in_file_order() {
        let parsed = parse(LISTING).expect("listing parses");
        assert_eq!(ids(&parsed), vec!["OH0000001", "OH0000002"]);
    }

    #[test]
    fn strips_nul_bytes_before_parsing() {
        let raw = LISTING.replace("OH0000002", "OH00\0\u{0}00002");
        let parsed = parse(&raw).expect("listing parses");
        assert_eq!(ids(&parsed), vec!["OH0000001", "OH0000002"]);
    }

    #[test]
    fn skips_invalid_ids_but_keeps_the_rest() {
        let raw = "a\nb\nc\nNPDES Permit Number\nOH/../x\nOH0000009\n";
        let parsed = parse(raw).expect("listing parses");
        assert_eq!(ids(&parsed), vec!["OH0000009"]);
    }

    #[test]
    fn short_files_are_truncated() {
        assert!(matches!(parse("only\ntwo\n"), Err(ListingError::Truncated { .. })));
        assert!(matches!(parse("a\nb\nc\n"), Err(ListingError::Truncated { .. })));
    }

    #[test]
    fn missing_id_column_is_reported() {
        let err = parse("a\nb\nc\nName,State\nAlpha,OH\n").expect_err("column missing");
        assert!(matches!(err, ListingError::MissingColumn { .. }));
    }

    #[test]
    fn honours_custom_layout() {
        let options = ListingOptions::builder()
            .preamble_lines(0)
            .id_column("permit")
            .build();
        let parsed = parse_listing(Path::new("x.csv"), b"permit\nTX1\n", &options)
            .expect("listing parses");
        assert_eq!(ids(&parsed), vec!["TX1"]);
    }
}
