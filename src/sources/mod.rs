//! Data suppliers for the hydration pipeline.
//!
//! # Sources
//!
//! - [`rest`]: the remote relational data service (the authoritative gateway)
//! - [`snapshot`]: the precomputed static export used as an offline-safe default
//! - [`hero`]: a small scoped fetch for fast first paint
//! - [`bootstrap`]: the full bulk fetch, plus the per-endpoint direct fallback
//!
//! Raw records from any of these pass through [`normalize`] exactly once.

pub mod bootstrap;
pub mod hero;
pub mod normalize;
pub mod rest;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Group, Pollutant, SeriesRow};

pub use rest::RestGateway;
pub use snapshot::{SnapshotClient, SnapshotDocument};

/// Query interface of the remote data service.
#[async_trait]
pub trait RemoteDataGateway: Send + Sync + 'static {
    /// All known pollutants, including the "Activity Data" pseudo-pollutant.
    async fn all_pollutants(&self) -> Result<Vec<Pollutant>>;

    /// All known source groups.
    async fn all_groups(&self) -> Result<Vec<Group>>;

    /// Series rows restricted to a scope.
    async fn series_rows(&self, scope: &SeriesScope) -> Result<Vec<SeriesRow>>;
}

/// Restriction on which series rows to fetch. Empty lists mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesScope {
    pub pollutant_ids: Vec<i64>,
    pub group_ids: Vec<i64>,
}

impl SeriesScope {
    /// Every row.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(pollutant_ids: Vec<i64>, group_ids: Vec<i64>) -> Self {
        Self {
            pollutant_ids,
            group_ids,
        }
    }

    pub fn is_all(&self) -> bool {
        self.pollutant_ids.is_empty() && self.group_ids.is_empty()
    }

    /// Whether a row falls inside this scope.
    pub fn contains(&self, row: &SeriesRow) -> bool {
        (self.pollutant_ids.is_empty() || self.pollutant_ids.contains(&row.pollutant_id))
            && (self.group_ids.is_empty() || self.group_ids.contains(&row.group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn row(pollutant_id: i64, group_id: i64) -> SeriesRow {
        SeriesRow {
            pollutant_id,
            group_id,
            values: BTreeMap::new(),
        }
    }

    #[test]
    fn test_scope_all_contains_everything() {
        let scope = SeriesScope::all();
        assert!(scope.is_all());
        assert!(scope.contains(&row(1, 1)));
        assert!(scope.contains(&row(99, 42)));
    }

    #[test]
    fn test_scope_filters_both_axes() {
        let scope = SeriesScope::new(vec![1], vec![2, 3]);
        assert!(!scope.is_all());
        assert!(scope.contains(&row(1, 2)));
        assert!(scope.contains(&row(1, 3)));
        assert!(!scope.contains(&row(1, 4)));
        assert!(!scope.contains(&row(2, 2)));
    }

    #[test]
    fn test_scope_single_axis() {
        let scope = SeriesScope::new(vec![], vec![5]);
        assert!(scope.contains(&row(1, 5)));
        assert!(!scope.contains(&row(1, 6)));
    }
}
