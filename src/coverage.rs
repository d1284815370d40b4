//! Activity-data coverage: which groups are worth offering for emission-factor
//! analysis.
//!
//! The "Activity Data" pseudo-pollutant is the denominator of every emission
//! factor. A group whose activity series is blank or all zeros has no usable
//! denominator, so it is left out of the group selector.

use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::model::{Dataset, Group, SeriesRow};

/// Name of the activity pseudo-pollutant (matched case-insensitively).
pub const ACTIVITY_POLLUTANT: &str = "Activity Data";

/// Title of the synthetic aggregate group (matched case-insensitively).
pub const AGGREGATE_GROUP: &str = "all";

/// What the classification was based on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageMode {
    /// Authoritative activity series.
    Series,

    /// Precomputed per-group flags from provisional metadata.
    Provisional,
}

/// Result of a coverage pass.
#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    /// Groups to offer, in input order. Never contains the aggregate group.
    pub active: Vec<Group>,

    /// Non-aggregate groups classified inactive (0 when `fallback` is set).
    pub inactive_count: usize,

    pub mode: CoverageMode,

    /// Classification found nothing active and every group was let through.
    pub fallback: bool,
}

/// Whether a group is the synthetic "All" aggregate.
pub fn is_aggregate(group: &Group) -> bool {
    group.title.trim().eq_ignore_ascii_case(AGGREGATE_GROUP)
}

/// Lenient boolean parse of a provisional activity flag.
///
/// Accepts booleans, numbers (non-zero is true) and the strings
/// `true/false`, `t/f`, `yes/no`, `y/n`, `1/0` in any case.
pub fn parse_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => Some(true),
            "false" | "f" | "no" | "n" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Whether a series holds at least one finite, non-zero value in the known years.
///
/// With no known years every column of the row counts.
pub fn has_activity(row: &SeriesRow, years: &[i32]) -> bool {
    let nonzero = |v: &Option<f64>| v.is_some_and(|f| f.is_finite() && f != 0.0);
    if years.is_empty() {
        row.values.values().any(nonzero)
    } else {
        years
            .iter()
            .any(|y| row.values.get(y).is_some_and(nonzero))
    }
}

fn finish(groups: &[Group], active: Vec<Group>, mode: CoverageMode) -> CoverageReport {
    let candidates: Vec<&Group> = groups.iter().filter(|g| !is_aggregate(g)).collect();

    if active.is_empty() && !groups.is_empty() {
        // TODO: confirm upstream whether an empty coverage set is a data defect
        // that should be surfaced instead of letting every group through.
        warn!(
            groups = groups.len(),
            mode = ?mode,
            "No group has activity data; offering all groups"
        );
        return CoverageReport {
            active: candidates.into_iter().cloned().collect(),
            inactive_count: 0,
            mode,
            fallback: true,
        };
    }

    CoverageReport {
        inactive_count: candidates.len() - active.len(),
        active,
        mode,
        fallback: false,
    }
}

/// Classify groups from the authoritative activity series.
pub fn from_series(dataset: &Dataset) -> CoverageReport {
    let activity_id = dataset
        .pollutants
        .iter()
        .find(|p| p.name.trim().eq_ignore_ascii_case(ACTIVITY_POLLUTANT))
        .and_then(|p| p.id);

    let active = match activity_id {
        Some(pid) => dataset
            .groups
            .iter()
            .filter(|g| !is_aggregate(g))
            .filter(|g| {
                g.id
                    .and_then(|gid| dataset.row(pid, gid))
                    .is_some_and(|row| has_activity(row, &dataset.years))
            })
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    finish(&dataset.groups, active, CoverageMode::Series)
}

/// Classify groups from their precomputed `has_activity_data` flags.
///
/// Missing or unparseable flags count as inactive.
pub fn from_flags(groups: &[Group]) -> CoverageReport {
    let active = groups
        .iter()
        .filter(|g| !is_aggregate(g))
        .filter(|g| {
            g.has_activity_data
                .as_ref()
                .and_then(parse_flag)
                .unwrap_or(false)
        })
        .cloned()
        .collect();

    finish(groups, active, CoverageMode::Provisional)
}

/// Classify using series when the dataset is authoritative, flags otherwise.
pub fn classify(dataset: &Dataset, authoritative: bool) -> CoverageReport {
    if authoritative {
        from_series(dataset)
    } else {
        from_flags(&dataset.groups)
    }
}
