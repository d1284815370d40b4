//! Service configuration from environment variables.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `PLUME_PORT` | `3000` | HTTP listen port |
//! | `PLUME_GATEWAY_URL` | unset | REST root of the data service |
//! | `PLUME_GATEWAY_KEY` | unset | API key for the data service |
//! | `PLUME_SNAPSHOT_URL` | unset | URL of the static snapshot |
//! | `PLUME_SNAPSHOT_PATH` | unset | Local snapshot file (used if no URL) |
//! | `PLUME_HERO_POLLUTANT_ID` | unset | Pollutant of the hero scope |
//! | `PLUME_HERO_GROUP_IDS` | unset | Comma-separated groups of the hero scope |
//! | `PLUME_REQUEST_TIMEOUT_SECS` | `30` | Per-request HTTP timeout |

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::service::DataService;
use crate::sources::{RestGateway, SeriesScope, SnapshotClient};

/// Default port if not specified via environment variable.
pub const DEFAULT_PORT: u16 = 3000;

/// Default per-request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub gateway_url: Option<String>,
    pub gateway_key: Option<String>,
    pub snapshot_url: Option<String>,
    pub snapshot_path: Option<PathBuf>,
    pub hero_scope: SeriesScope,
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            gateway_url: None,
            gateway_key: None,
            snapshot_url: None,
            snapshot_path: None,
            hero_scope: SeriesScope::all(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars().collect())
    }

    /// Load configuration from an explicit variable map.
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        let get = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = get("PLUME_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let timeout_secs = get("PLUME_REQUEST_TIMEOUT_SECS")
            .and_then(|t| t.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let hero_scope = match get("PLUME_HERO_POLLUTANT_ID").and_then(|p| p.parse::<i64>().ok()) {
            Some(pollutant_id) => SeriesScope::new(
                vec![pollutant_id],
                get("PLUME_HERO_GROUP_IDS")
                    .map(|ids| parse_id_list(&ids))
                    .unwrap_or_default(),
            ),
            None => SeriesScope::all(),
        };

        Self {
            port,
            gateway_url: get("PLUME_GATEWAY_URL"),
            gateway_key: get("PLUME_GATEWAY_KEY"),
            snapshot_url: get("PLUME_SNAPSHOT_URL"),
            snapshot_path: get("PLUME_SNAPSHOT_PATH").map(PathBuf::from),
            hero_scope,
            request_timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Wire a [`DataService`] from this configuration.
    pub fn build_service(&self) -> DataService {
        let mut builder = DataService::builder().hero_scope(self.hero_scope.clone());

        if let Some(url) = &self.gateway_url {
            builder = builder.gateway(Arc::new(RestGateway::with_timeout(
                url,
                self.gateway_key.clone(),
                self.request_timeout,
            )));
        }

        if let Some(url) = &self.snapshot_url {
            builder = builder.snapshot(SnapshotClient::from_url(url, self.request_timeout));
        } else if let Some(path) = &self.snapshot_path {
            builder = builder.snapshot(SnapshotClient::from_file(path));
        }

        builder.build()
    }
}

/// Parse `"1, 2,x,3"` into `[1, 2, 3]`, skipping anything non-numeric.
fn parse_id_list(raw: &str) -> Vec<i64> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
