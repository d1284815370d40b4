//! Canonical data types for emissions datasets and cache state.
//!
//! Every gateway, snapshot, and hero payload is normalized into these types
//! at the boundary (see [`crate::sources::normalize`]), so the rest of the
//! crate never has to guess at field names.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pollutant known to the data service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pollutant {
    /// Database identifier. Some snapshot exports omit it.
    pub id: Option<i64>,

    /// Display name, e.g. "PM2.5" or "Activity Data".
    pub name: String,

    /// Measurement unit, e.g. "kilotonnes".
    #[serde(default)]
    pub unit: Option<String>,
}

/// An emission source group (sector), e.g. "Road Transport".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Database identifier.
    pub id: Option<i64>,

    /// Display title.
    pub title: String,

    /// Precomputed "has activity data" attribute as exported upstream.
    ///
    /// Kept raw because exports disagree on its encoding (bool, 0/1,
    /// "true"/"yes"/...). Only consulted when series rows are not hydrated.
    #[serde(default)]
    pub has_activity_data: Option<serde_json::Value>,
}

/// One series: a pollutant's yearly values for a single group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub pollutant_id: i64,
    pub group_id: i64,

    /// Year to value. `None` marks a year column that exists but holds no value.
    pub values: BTreeMap<i32, Option<f64>>,
}

impl SeriesRow {
    /// Value for a given year, if present and numeric.
    pub fn value(&self, year: i32) -> Option<f64> {
        self.values.get(&year).copied().flatten()
    }
}

/// A complete or partial emissions dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub pollutants: Vec<Pollutant>,
    pub groups: Vec<Group>,
    pub rows: Vec<SeriesRow>,

    /// Known year columns, ascending.
    #[serde(default)]
    pub years: Vec<i32>,
}

impl Dataset {
    /// Build a dataset, deriving the known years from the rows.
    pub fn new(pollutants: Vec<Pollutant>, groups: Vec<Group>, rows: Vec<SeriesRow>) -> Self {
        let years = years_of(&rows);
        Self {
            pollutants,
            groups,
            rows,
            years,
        }
    }

    /// Replace the known year columns.
    pub fn with_years(mut self, years: Vec<i32>) -> Self {
        let set: BTreeSet<i32> = years.into_iter().collect();
        self.years = set.into_iter().collect();
        self
    }

    /// Whether this dataset can be shown at all: it needs both pollutants and rows.
    pub fn is_usable(&self) -> bool {
        !self.pollutants.is_empty() && !self.rows.is_empty()
    }

    /// Find the row for a pollutant/group pair.
    pub fn row(&self, pollutant_id: i64, group_id: i64) -> Option<&SeriesRow> {
        self.rows
            .iter()
            .find(|r| r.pollutant_id == pollutant_id && r.group_id == group_id)
    }
}

/// Collect the sorted set of years present in any row.
pub fn years_of(rows: &[SeriesRow]) -> Vec<i32> {
    let set: BTreeSet<i32> = rows.iter().flat_map(|r| r.values.keys().copied()).collect();
    set.into_iter().collect()
}

/// Hydration status of the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Nothing loaded yet, or the last attempt failed.
    Empty,

    /// A load is in flight and nothing usable is cached yet.
    Loading,

    /// A provisional (hero, snapshot or direct) dataset is cached.
    Partial,

    /// The authoritative bulk dataset is cached.
    Full,
}

impl CacheStatus {
    /// Whether cached data can be served.
    pub fn is_loaded(&self) -> bool {
        matches!(self, CacheStatus::Partial | CacheStatus::Full)
    }
}

/// Which tier produced the cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Hero,
    Snapshot,
    Bootstrap,
    Direct,
}

impl DataSource {
    /// Get a human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            DataSource::Hero => "hero",
            DataSource::Snapshot => "snapshot",
            DataSource::Bootstrap => "bootstrap",
            DataSource::Direct => "direct",
        }
    }

    /// Status a successful load from this source puts the cache in.
    pub fn yields(&self) -> CacheStatus {
        match self {
            DataSource::Bootstrap => CacheStatus::Full,
            _ => CacheStatus::Partial,
        }
    }
}

/// Snapshot of the cache for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CacheState {
    pub status: CacheStatus,
    pub source: Option<DataSource>,

    /// Bumped on every commit and invalidation.
    pub generation: u64,

    pub updated_at: Option<DateTime<Utc>>,
}

/// A dataset together with the status and source it was cached under.
///
/// Taken in one step, so the three always agree even while an upgrade is
/// landing.
#[derive(Debug, Clone)]
pub struct Hydrated {
    pub data: Arc<Dataset>,
    pub status: CacheStatus,
    pub source: DataSource,
}

impl Hydrated {
    pub fn is_full(&self) -> bool {
        self.status == CacheStatus::Full
    }
}

/// Response body for `GET /data` and `GET /data/cached`.
#[derive(Debug, Clone, Serialize)]
pub struct DataResponse {
    pub status: CacheStatus,
    pub source: Option<DataSource>,
    pub full: bool,
    pub data: Dataset,
}

/// Response body for `GET /data/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: CacheStatus,
    pub source: Option<DataSource>,
    pub loaded: bool,
    pub full: bool,
    pub generation: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Hydrated> for DataResponse {
    fn from(hydrated: Hydrated) -> Self {
        Self {
            status: hydrated.status,
            source: Some(hydrated.source),
            full: hydrated.is_full(),
            data: hydrated.data.as_ref().clone(),
        }
    }
}

impl From<CacheState> for StatusResponse {
    fn from(state: CacheState) -> Self {
        Self {
            status: state.status,
            source: state.source,
            loaded: state.status.is_loaded(),
            full: state.status == CacheStatus::Full,
            generation: state.generation,
            updated_at: state.updated_at,
        }
    }
}
