//! Precomputed static snapshot of the default view.
//!
//! The snapshot is a versioned, read-only JSON export:
//!
//! ```json
//! {
//!     "generatedAt": "2025-01-15T10:30:00Z",
//!     "defaults": { "pollutantId": 1, "groupIds": [9, 10] },
//!     "data": {
//!         "pollutants": [...],
//!         "groups": [...],
//!         "timeseries": [...],
//!         "yearKeys": ["f1970", "f1971", ...]
//!     }
//! }
//! ```
//!
//! Over HTTP it is always fetched bypassing caches, since a stale copy would
//! silently pin an old export.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::normalize;
use crate::error::{HydrationError, Result};
use crate::model::Dataset;

/// The snapshot document as published.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDocument {
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub defaults: SnapshotDefaults,

    #[serde(default)]
    pub data: SnapshotData,
}

/// Default selection the snapshot was generated for.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDefaults {
    #[serde(default, alias = "pollutant_id")]
    pub pollutant_id: Option<i64>,

    #[serde(default, alias = "group_ids")]
    pub group_ids: Vec<i64>,
}

/// Raw record arrays, normalized on conversion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    #[serde(default)]
    pub pollutants: Vec<Value>,

    #[serde(default)]
    pub groups: Vec<Value>,

    #[serde(default)]
    pub timeseries: Vec<Value>,

    #[serde(default)]
    pub year_keys: Vec<Value>,
}

impl SnapshotDocument {
    /// Normalize into a canonical dataset.
    ///
    /// `yearKeys` wins over years derived from rows when present.
    pub fn to_dataset(&self) -> Dataset {
        let dataset = Dataset::new(
            normalize::pollutants(&self.data.pollutants),
            normalize::groups(&self.data.groups),
            normalize::series_rows(&self.data.timeseries),
        );

        let years: Vec<i32> = self
            .data
            .year_keys
            .iter()
            .filter_map(|k| match k {
                Value::String(s) => normalize::parse_year_key(s),
                Value::Number(n) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
                _ => None,
            })
            .collect();

        if years.is_empty() {
            dataset
        } else {
            dataset.with_years(years)
        }
    }
}

/// Where the snapshot lives.
#[derive(Debug, Clone)]
enum SnapshotLocation {
    Url(String),
    File(PathBuf),
}

/// Loader for the static snapshot.
#[derive(Clone)]
pub struct SnapshotClient {
    client: reqwest::Client,
    location: SnapshotLocation,
}

impl SnapshotClient {
    /// Create a client that fetches the snapshot over HTTP.
    pub fn from_url(url: &str, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            location: SnapshotLocation::Url(url.to_string()),
        }
    }

    /// Create a client that reads the snapshot from disk.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::Client::new(),
            location: SnapshotLocation::File(path.into()),
        }
    }

    /// Fetch and parse the snapshot document.
    pub async fn fetch_document(&self) -> Result<SnapshotDocument> {
        let body = match &self.location {
            SnapshotLocation::Url(url) => {
                let url = cache_busted(url, Utc::now().timestamp_millis());
                debug!(url = %url, "Fetching snapshot");

                let response = self
                    .client
                    .get(&url)
                    .header("Cache-Control", "no-cache, no-store")
                    .header("Pragma", "no-cache")
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(HydrationError::FetchFailed(format!(
                        "snapshot returned {}",
                        response.status()
                    )));
                }
                response.text().await?
            }
            SnapshotLocation::File(path) => tokio::fs::read_to_string(path)
                .await
                .map_err(|e| {
                    HydrationError::FetchFailed(format!(
                        "cannot read snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?,
        };

        let document = serde_json::from_str::<SnapshotDocument>(&body)?;
        Ok(document)
    }

    /// Fetch the snapshot and convert it to a dataset.
    ///
    /// Fails with [`HydrationError::EmptyResult`] if it lacks pollutants or rows.
    pub async fn load(&self) -> Result<Dataset> {
        let document = self.fetch_document().await?;
        let dataset = document.to_dataset();
        if !dataset.is_usable() {
            return Err(HydrationError::EmptyResult(
                "snapshot has no pollutants or series".into(),
            ));
        }

        info!(
            generated_at = ?document.generated_at,
            default_pollutant = ?document.defaults.pollutant_id,
            pollutants = dataset.pollutants.len(),
            groups = dataset.groups.len(),
            rows = dataset.rows.len(),
            "Snapshot loaded"
        );
        Ok(dataset)
    }
}

fn cache_busted(url: &str, stamp: i64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}v={}", url, sep, stamp)
}
