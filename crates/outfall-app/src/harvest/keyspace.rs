//! Deterministic enumeration of work keys.

use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::harvest::key::{RegionCode, WorkKey, parse_year};
use crate::harvest::listing::{ListingOptions, read_listing};

#[derive(Debug, Error)]
pub enum KeySpaceError {
    #[error("listing directory {path} for region {region} does not exist")]
    MissingRegionDir { region: RegionCode, path: PathBuf },
    #[error("failed to scan listing directory {path}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone)]
struct Listing {
    year: i32,
    path: PathBuf,
}

#[derive(Debug, Clone)]
enum KeySource {
    CrossProduct {
        years: RangeInclusive<i32>,
        regions: Vec<RegionCode>,
    },
    Derived {
        region: RegionCode,
        listings: Vec<Listing>,
        options: ListingOptions,
    },
}

/// Finite, restartable sequence of work keys.
///
/// Every call to [`WorkKeySpace::keys`] yields the same keys in the same
/// order for unchanged inputs. Derived listings are parsed only when the
/// iterator reaches them.
#[derive(Debug, Clone)]
pub struct WorkKeySpace {
    source: KeySource,
}

impl WorkKeySpace {
    /// Static grid: ascending years, then regions in the given order.
    pub fn cross_product(years: RangeInclusive<i32>, regions: Vec<RegionCode>) -> Self {
        Self {
            source: KeySource::CrossProduct { years, regions },
        }
    }

    /// Permit keys for `region`, read from `{listing_dir}/{YYYY}_{region}.csv`
    /// files in ascending year order.
    pub fn derived(
        region: RegionCode,
        listing_dir: &Path,
        years: RangeInclusive<i32>,
        options: ListingOptions,
    ) -> Result<Self, KeySpaceError> {
        if !listing_dir.is_dir() {
            return Err(KeySpaceError::MissingRegionDir {
                region,
                path: listing_dir.to_path_buf(),
            });
        }

        let listings = discover_listings(&region, listing_dir, &years)?;
        info!(
            region = %region,
            listings = listings.len(),
            dir = %listing_dir.display(),
            "discovered facility listings"
        );

        Ok(Self {
            source: KeySource::Derived {
                region,
                listings,
                options,
            },
        })
    }

    pub fn keys(&self) -> Box<dyn Iterator<Item = WorkKey> + Send + '_> {
        match &self.source {
            KeySource::CrossProduct { years, regions } => {
                Box::new(years.clone().flat_map(move |year| {
                    regions
                        .iter()
                        .map(move |region| WorkKey::facility(year, region.clone()))
                }))
            }
            KeySource::Derived {
                region,
                listings,
                options,
            } => Box::new(listings.iter().flat_map(move |listing| {
                let ids = match read_listing(&listing.path, options) {
                    Ok(ids) if ids.is_empty() => {
                        warn!(region = %region, year = listing.year, "no permit ids found in listing");
                        ids
                    }
                    Ok(ids) => {
                        info!(
                            region = %region,
                            year = listing.year,
                            permits = ids.len(),
                            "processing permits from listing"
                        );
                        ids
                    }
                    Err(err) => {
                        warn!(
                            region = %region,
                            year = listing.year,
                            error = %err,
                            "skipping malformed facility listing"
                        );
                        Vec::new()
                    }
                };
                let region = region.clone();
                let year = listing.year;
                ids.into_iter()
                    .map(move |id| WorkKey::permit(year, region.clone(), id))
            })),
        }
    }
}

fn discover_listings(
    region: &RegionCode,
    dir: &Path,
    years: &RangeInclusive<i32>,
) -> Result<Vec<Listing>, KeySpaceError> {
    let scan_err = |source| KeySpaceError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    let suffix = format!("_{region}.csv");

    let mut listings = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(scan_err)? {
        let entry = entry.map_err(scan_err)?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(prefix) = name.strip_suffix(&suffix) else {
            continue;
        };
        let year = match parse_year(prefix) {
            Ok(year) => year,
            Err(_) => {
                warn!(file = name, "skipping listing with invalid year format");
                continue;
            }
        };
        if !years.contains(&year) {
            warn!(file = name, year, "skipping listing outside the configured year range");
            continue;
        }
        listings.push(Listing {
            year,
            path: entry.path(),
        });
    }

    listings.sort_by_key(|listing| listing.year);
    debug!(region = %region, count = listings.len(), "sorted listings by year");
    Ok(listings)
}
