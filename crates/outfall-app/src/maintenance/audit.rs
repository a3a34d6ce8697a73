//! Read-only report of keys still pending in each stage.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::ops::RangeInclusive;

use serde::Serialize;
use tracing::{debug, warn};

use crate::harvest::key::{RegionCode, Stage, WorkKey};
use crate::harvest::keyspace::{KeySpaceError, WorkKeySpace};
use crate::harvest::listing::ListingOptions;
use crate::paths::{AppPaths, ArtifactLayout};

/// A facility listing that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacilityGap {
    pub region: String,
    pub year: i32,
    /// A no-data reply for this key sits in quarantine.
    pub quarantined: bool,
}

/// Permits of one listing without a stored DMR artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermitGap {
    pub region: String,
    pub year: i32,
    pub listed: usize,
    pub missing: Vec<String>,
    pub quarantined: usize,
}

/// Regions without any DMR directory for a year that has DMR data at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct YearCoverage {
    pub year: i32,
    pub missing_regions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub facility_gaps: Vec<FacilityGap>,
    pub permit_gaps: Vec<PermitGap>,
    pub dmr_coverage: Vec<YearCoverage>,
}

impl AuditReport {
    pub fn is_complete(&self) -> bool {
        self.facility_gaps.is_empty()
            && self.permit_gaps.is_empty()
            && self.dmr_coverage.is_empty()
    }

    pub fn missing_permits(&self) -> usize {
        self.permit_gaps.iter().map(|gap| gap.missing.len()).sum()
    }

    /// Plain-text rendering, one section per stage.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        if self.is_complete() {
            out.push_str("all expected artifacts are present\n");
            return out;
        }

        if !self.facility_gaps.is_empty() {
            let _ = writeln!(out, "facility listings missing: {}", self.facility_gaps.len());
            for gap in &self.facility_gaps {
                let note = if gap.quarantined { " (quarantined)" } else { "" };
                let _ = writeln!(out, "  - {}_{}{}", gap.year, gap.region, note);
            }
        }
        if !self.permit_gaps.is_empty() {
            let _ = writeln!(out, "dmr permits missing: {}", self.missing_permits());
            for gap in &self.permit_gaps {
                let _ = writeln!(
                    out,
                    "{}_{}: {} of {} missing ({} quarantined)",
                    gap.region,
                    gap.year,
                    gap.missing.len(),
                    gap.listed,
                    gap.quarantined
                );
                for id in &gap.missing {
                    let _ = writeln!(out, "  - {id}");
                }
            }
        }
        for coverage in &self.dmr_coverage {
            let _ = writeln!(
                out,
                "year {}: missing {} regions -> {}",
                coverage.year,
                coverage.missing_regions.len(),
                coverage.missing_regions.join(", ")
            );
        }
        out
    }
}

/// Compare the expected key space of both stages with what is on disk.
pub fn audit(
    paths: &AppPaths,
    regions: &[RegionCode],
    years: RangeInclusive<i32>,
    options: &ListingOptions,
) -> AuditReport {
    let facilities = paths.layout(Stage::Facilities);
    let mut report = AuditReport::default();

    for key in WorkKeySpace::cross_product(years.clone(), regions.to_vec()).keys() {
        if !facilities.success_path(&key).is_file() {
            report.facility_gaps.push(FacilityGap {
                region: key.region().to_string(),
                year: key.year(),
                quarantined: facilities.quarantine_path(&key).is_file(),
            });
        }
    }

    for region in regions {
        let listing_dir = facilities.listing_dir(region);
        let space = match WorkKeySpace::derived(
            region.clone(),
            &listing_dir,
            years.clone(),
            options.clone(),
        ) {
            Ok(space) => space,
            Err(KeySpaceError::MissingRegionDir { .. }) => {
                debug!(region = %region, "no listings downloaded for region");
                continue;
            }
            Err(err) => {
                warn!(region = %region, error = %err, "skipping region in audit");
                continue;
            }
        };
        collect_permit_gaps(&space, paths, &mut report);
    }

    report.dmr_coverage = dmr_coverage(paths, regions, years);
    report
}

fn collect_permit_gaps(space: &WorkKeySpace, paths: &AppPaths, report: &mut AuditReport) {
    let dmr = paths.layout(Stage::Dmr);
    let mut current: Option<PermitGap> = None;

    let mut flush = |gap: Option<PermitGap>| {
        if let Some(gap) = gap.filter(|gap| !gap.missing.is_empty()) {
            report.permit_gaps.push(gap);
        }
    };

    for key in space.keys() {
        let same_listing = current
            .as_ref()
            .is_some_and(|gap| gap.year == key.year() && gap.region == key.region().as_str());
        if !same_listing {
            flush(current.take());
            current = Some(PermitGap {
                region: key.region().to_string(),
                year: key.year(),
                listed: 0,
                missing: Vec::new(),
                quarantined: 0,
            });
        }
        if let Some(gap) = current.as_mut() {
            record_permit(gap, &key, &dmr);
        }
    }
    flush(current.take());
}

fn record_permit(gap: &mut PermitGap, key: &WorkKey, dmr: &ArtifactLayout) {
    gap.listed += 1;
    if dmr.success_path(key).is_file() {
        return;
    }
    if dmr.quarantine_path(key).is_file() {
        gap.quarantined += 1;
    }
    if let Some(id) = key.entity_id() {
        gap.missing.push(id.to_string());
    }
}

fn dmr_coverage(
    paths: &AppPaths,
    regions: &[RegionCode],
    years: RangeInclusive<i32>,
) -> Vec<YearCoverage> {
    let dmr = paths.layout(Stage::Dmr);

    years
        .filter(|year| dmr.root().join(year.to_string()).is_dir())
        .filter_map(|year| {
            let missing: Vec<String> = regions
                .iter()
                .filter(|region| !dmr.permit_dir(year, region).is_dir())
                .map(|region| region.as_str().to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            (!missing.is_empty()).then_some(YearCoverage {
                year,
                missing_regions: missing,
            })
        })
        .collect()
}
