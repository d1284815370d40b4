//! In-memory gateway used by unit tests across the crate.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{RemoteDataGateway, SeriesScope};
use crate::error::{HydrationError, Result};
use crate::model::{Dataset, Group, Pollutant, SeriesRow};

/// Serves a fixed dataset, optionally after a delay or failing outright.
#[derive(Clone, Default)]
pub struct StubGateway {
    data: Arc<Dataset>,
    delay: Option<Duration>,
    bulk_delay: Option<Duration>,
    failing: Arc<AtomicBool>,
    failing_groups: Arc<AtomicBool>,
    pub pollutant_calls: Arc<AtomicUsize>,
    pub group_calls: Arc<AtomicUsize>,
    pub row_calls: Arc<AtomicUsize>,
}

impl StubGateway {
    pub fn new(data: Dataset) -> Self {
        Self {
            data: Arc::new(data),
            ..Default::default()
        }
    }

    pub fn unreachable() -> Self {
        let stub = Self::default();
        stub.set_failing(true);
        stub
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Extra delay applied only to unscoped series queries.
    pub fn with_bulk_delay(mut self, delay: Duration) -> Self {
        self.bulk_delay = Some(delay);
        self
    }

    /// Make only the group query fail.
    pub fn fail_groups(&self) {
        self.failing_groups.store(true, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    async fn respond<T>(&self, counter: &AtomicUsize, value: T) -> Result<T> {
        counter.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(HydrationError::FetchFailed("connection refused".into()));
        }
        Ok(value)
    }
}

#[async_trait]
impl RemoteDataGateway for StubGateway {
    async fn all_pollutants(&self) -> Result<Vec<Pollutant>> {
        self.respond(&self.pollutant_calls, self.data.pollutants.clone())
            .await
    }

    async fn all_groups(&self) -> Result<Vec<Group>> {
        let groups = self.respond(&self.group_calls, self.data.groups.clone()).await?;
        if self.failing_groups.load(Ordering::SeqCst) {
            return Err(HydrationError::FetchFailed("groups table unavailable".into()));
        }
        Ok(groups)
    }

    async fn series_rows(&self, scope: &SeriesScope) -> Result<Vec<SeriesRow>> {
        let rows = self
            .data
            .rows
            .iter()
            .filter(|r| scope.contains(r))
            .cloned()
            .collect();
        if let (true, Some(delay)) = (scope.is_all(), self.bulk_delay) {
            tokio::time::sleep(delay).await;
        }
        self.respond(&self.row_calls, rows).await
    }
}

pub fn pollutant(id: i64, name: &str) -> Pollutant {
    Pollutant {
        id: Some(id),
        name: name.to_string(),
        unit: None,
    }
}

pub fn group(id: i64, title: &str) -> Group {
    Group {
        id: Some(id),
        title: title.to_string(),
        has_activity_data: None,
    }
}

pub fn row(pollutant_id: i64, group_id: i64, values: &[(i32, f64)]) -> SeriesRow {
    SeriesRow {
        pollutant_id,
        group_id,
        values: values.iter().map(|(y, v)| (*y, Some(*v))).collect(),
    }
}

/// A small but complete dataset: two pollutants, three groups, activity rows.
pub fn sample_dataset() -> Dataset {
    Dataset::new(
        vec![pollutant(1, "PM2.5"), pollutant(2, "Activity Data")],
        vec![group(9, "All"), group(10, "Road Transport"), group(11, "Shipping")],
        vec![
            row(1, 9, &[(2022, 40.0), (2023, 42.0)]),
            row(1, 10, &[(2022, 10.0), (2023, 11.0)]),
            row(2, 9, &[(2022, 5.0), (2023, 6.0)]),
            row(2, 10, &[(2022, 3.0), (2023, 4.0)]),
            row(2, 11, &[(2022, 0.0), (2023, 0.0)]),
        ],
    )
}
