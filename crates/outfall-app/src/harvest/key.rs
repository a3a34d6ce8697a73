//! Work keys and the checkpoint coordinates derived from them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, EnumString};
use thiserror::Error;

/// Years that render as exactly four digits.
pub const YEAR_RANGE: std::ops::RangeInclusive<i32> = 1000..=9999;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid region code `{0}`; expected two ASCII letters")]
    InvalidRegion(String),
    #[error("invalid permit id `{0}`; expected ASCII letters and digits only")]
    InvalidEntityId(String),
    #[error("invalid year `{0}`; expected four digits")]
    InvalidYear(String),
}

/// Crawl granularity. `Facilities` enumerates a static year × region grid,
/// `Dmr` derives one key per permit listed in a facility listing.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumString,
    AsRefStr,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Facilities,
    Dmr,
}

impl Stage {
    pub fn slug(&self) -> &'static str {
        match self {
            Stage::Facilities => "facilities",
            Stage::Dmr => "dmr",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Two-letter, upper-case state or territory code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RegionCode(String);

impl RegionCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RegionCode {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.len() != 2 || !trimmed.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(KeyError::InvalidRegion(s.to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for RegionCode {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RegionCode> for String {
    fn from(value: RegionCode) -> Self {
        value.0
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permit identifier as it appears in listings. Restricted to ASCII
/// alphanumerics so it can be used verbatim as a file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for EntityId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.chars().all(|ch| ch.is_ascii_alphanumeric()) {
            return Err(KeyError::InvalidEntityId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for EntityId {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityId> for String {
    fn from(value: EntityId) -> Self {
        value.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a four-digit calendar year.
pub fn parse_year(s: &str) -> Result<i32, KeyError> {
    let trimmed = s.trim();
    if trimmed.len() != 4 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::InvalidYear(s.to_string()));
    }
    trimmed
        .parse()
        .ok()
        .filter(|year| YEAR_RANGE.contains(year))
        .ok_or_else(|| KeyError::InvalidYear(s.to_string()))
}

/// One unit of downloadable work.
///
/// Ordering between keys is the order in which a [`WorkKeySpace`] yields
/// them, so no `Ord` is derived here.
///
/// [`WorkKeySpace`]: crate::harvest::keyspace::WorkKeySpace
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkKey {
    year: i32,
    region: RegionCode,
    entity_id: Option<EntityId>,
}

impl WorkKey {
    pub fn facility(year: i32, region: RegionCode) -> Self {
        Self {
            year,
            region,
            entity_id: None,
        }
    }

    pub fn permit(year: i32, region: RegionCode, entity_id: EntityId) -> Self {
        Self {
            year,
            region,
            entity_id: Some(entity_id),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn region(&self) -> &RegionCode {
        &self.region
    }

    pub fn entity_id(&self) -> Option<&EntityId> {
        self.entity_id.as_ref()
    }

    pub fn stage(&self) -> Stage {
        match self.entity_id {
            Some(_) => Stage::Dmr,
            None => Stage::Facilities,
        }
    }

    /// Checkpoint store this key is recorded in.
    pub fn scope(&self) -> CheckpointScope {
        match self.entity_id {
            Some(_) => CheckpointScope::region_year(self.region.clone(), self.year),
            None => CheckpointScope::region(self.region.clone()),
        }
    }

    /// Line written to the scope's checkpoint once the key is finished.
    pub fn fragment(&self) -> KeyFragment {
        match &self.entity_id {
            Some(id) => KeyFragment::Entity(id.clone()),
            None => KeyFragment::Year(self.year),
        }
    }
}

impl fmt::Display for WorkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.entity_id {
            Some(id) => write!(f, "{}/{}/{}", self.region, self.year, id),
            None => write!(f, "{}/{}", self.region, self.year),
        }
    }
}

/// Partition of the key space backed by one checkpoint file. Facility keys
/// are scoped per region, permit keys per region and year.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointScope {
    region: RegionCode,
    year: Option<i32>,
}

impl CheckpointScope {
    pub fn region(region: RegionCode) -> Self {
        Self { region, year: None }
    }

    pub fn region_year(region: RegionCode, year: i32) -> Self {
        Self {
            region,
            year: Some(year),
        }
    }

    pub fn region_code(&self) -> &RegionCode {
        &self.region
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn stage(&self) -> Stage {
        match self.year {
            Some(_) => Stage::Dmr,
            None => Stage::Facilities,
        }
    }

    pub fn fragment_kind(&self) -> FragmentKind {
        match self.year {
            Some(_) => FragmentKind::Entity,
            None => FragmentKind::Year,
        }
    }

    pub fn file_name(&self) -> String {
        match self.year {
            Some(year) => format!("{}_{}_progress.txt", self.region, year),
            None => format!("{}_progress.txt", self.region),
        }
    }
}

impl fmt::Display for CheckpointScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.year {
            Some(year) => write!(f, "{}/{}", self.region, year),
            None => write!(f, "{}", self.region),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    Year,
    Entity,
}

/// Key component stored as one checkpoint line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyFragment {
    Year(i32),
    Entity(EntityId),
}

impl KeyFragment {
    pub fn parse(kind: FragmentKind, raw: &str) -> Result<Self, KeyError> {
        match kind {
            FragmentKind::Year => parse_year(raw).map(KeyFragment::Year),
            FragmentKind::Entity => raw.parse().map(KeyFragment::Entity),
        }
    }

    pub fn kind(&self) -> FragmentKind {
        match self {
            KeyFragment::Year(_) => FragmentKind::Year,
            KeyFragment::Entity(_) => FragmentKind::Entity,
        }
    }
}

impl fmt::Display for KeyFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFragment::Year(year) => write!(f, "{year}"),
            KeyFragment::Entity(id) => f.write_str(id.as_str()),
        }
    }
}
