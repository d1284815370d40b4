//! Client for the remote relational data service.
//!
//! The service exposes tables through a PostgREST-style HTTP interface:
//! `GET {base}/{table}?select=*` with optional `column=in.(a,b)` filters.
//! Rows come back as JSON arrays of wide records which are normalized by
//! [`super::normalize`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{RemoteDataGateway, SeriesScope, normalize};
use crate::error::{HydrationError, Result};
use crate::model::{Group, Pollutant, SeriesRow};

/// Table holding pollutant metadata.
pub const POLLUTANT_TABLE: &str = "naei_global_t_pollutant";

/// Table holding group (sector) metadata.
pub const GROUP_TABLE: &str = "naei_global_t_category";

/// Wide table of yearly series values.
pub const TIMESERIES_TABLE: &str = "naei_2023ds_t_category_data";

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the remote data service.
#[derive(Clone)]
pub struct RestGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestGateway {
    /// Create a new gateway client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - REST root of the service, e.g. `https://xyz.supabase.co/rest/v1`
    /// * `api_key` - Optional key sent as both `apikey` and bearer token
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    /// Create a client with an explicit request timeout.
    pub fn with_timeout(base_url: &str, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Build a request with optional authentication.
    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.get(url);
        if let Some(key) = &self.api_key {
            req.header("apikey", key)
                .header("Authorization", format!("Bearer {}", key))
        } else {
            req
        }
    }

    fn table_url(&self, table: &str, scope: Option<&SeriesScope>) -> String {
        let mut url = format!("{}/{}?select=*", self.base_url, table);
        if let Some(scope) = scope {
            if !scope.pollutant_ids.is_empty() {
                url.push_str(&format!(
                    "&pollutant_id={}",
                    urlencoding::encode(&in_filter(&scope.pollutant_ids))
                ));
            }
            if !scope.group_ids.is_empty() {
                url.push_str(&format!(
                    "&group_id={}",
                    urlencoding::encode(&in_filter(&scope.group_ids))
                ));
            }
        }
        url
    }

    async fn fetch_table(&self, table: &str, scope: Option<&SeriesScope>) -> Result<Vec<Value>> {
        let url = self.table_url(table, scope);
        debug!(table, "Querying data service");

        let response = self.build_request(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HydrationError::FetchFailed(format!(
                "{} returned {}: {}",
                table,
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let records = response.json::<Vec<Value>>().await?;
        Ok(records)
    }
}

fn in_filter(ids: &[i64]) -> String {
    let joined: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    format!("in.({})", joined.join(","))
}

#[async_trait]
impl RemoteDataGateway for RestGateway {
    async fn all_pollutants(&self) -> Result<Vec<Pollutant>> {
        let records = self.fetch_table(POLLUTANT_TABLE, None).await?;
        Ok(normalize::pollutants(&records))
    }

    async fn all_groups(&self) -> Result<Vec<Group>> {
        let records = self.fetch_table(GROUP_TABLE, None).await?;
        Ok(normalize::groups(&records))
    }

    async fn series_rows(&self, scope: &SeriesScope) -> Result<Vec<SeriesRow>> {
        let scope = (!scope.is_all()).then_some(scope);
        let records = self.fetch_table(TIMESERIES_TABLE, scope).await?;
        Ok(normalize::series_rows(&records))
    }
}
