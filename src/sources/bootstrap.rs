//! Full authoritative bulk fetch, the shared selector lists, and the
//! per-endpoint direct fallback.
//!
//! The pollutant and group lists are fetched once by [`fetch_selectors`] and
//! handed to both the bulk fetch and the hero fetch, so a load never queries
//! the same table twice at the same time.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, warn};

use super::{RemoteDataGateway, SeriesScope};
use crate::error::{HydrationError, Result};
use crate::model::Dataset;

/// Fetch every pollutant and group, without rows.
pub async fn fetch_selectors(gateway: &dyn RemoteDataGateway) -> Result<Dataset> {
    let (pollutants, groups) = tokio::try_join!(gateway.all_pollutants(), gateway.all_groups())?;
    info!(
        pollutants = pollutants.len(),
        groups = groups.len(),
        "Selector lists fetched"
    );
    Ok(Dataset::new(pollutants, groups, Vec::new()))
}

/// Fetch every series row and combine it with the selector lists.
///
/// `selectors` resolves to the output of [`fetch_selectors`], usually a
/// shared in-flight fetch. It runs concurrently with the row query; any
/// failure fails the whole fetch.
pub async fn fetch_full<S>(gateway: &dyn RemoteDataGateway, selectors: S) -> Result<Dataset>
where
    S: Future<Output = Result<Arc<Dataset>>>,
{
    let all = SeriesScope::all();
    let (selectors, rows) = tokio::try_join!(selectors, gateway.series_rows(&all))?;

    if selectors.pollutants.is_empty() || rows.is_empty() {
        return Err(HydrationError::EmptyResult(format!(
            "bootstrap returned {} pollutants and {} rows",
            selectors.pollutants.len(),
            rows.len()
        )));
    }

    let dataset = Dataset::new(selectors.pollutants.clone(), selectors.groups.clone(), rows);
    info!(
        pollutants = dataset.pollutants.len(),
        groups = dataset.groups.len(),
        rows = dataset.rows.len(),
        years = dataset.years.len(),
        "Bootstrap fetch complete"
    );
    Ok(dataset)
}

/// Last-resort fetch: query each endpoint on its own, keeping whatever succeeds.
///
/// Usable only if both pollutants and rows came back. A failed group query
/// just leaves the group list empty.
pub async fn fetch_direct(gateway: &dyn RemoteDataGateway, scope: &SeriesScope) -> Result<Dataset> {
    let (pollutants, groups, rows) = tokio::join!(
        gateway.all_pollutants(),
        gateway.all_groups(),
        gateway.series_rows(scope),
    );

    let mut errors = Vec::new();
    let pollutants = keep("pollutants", pollutants, &mut errors);
    let groups = keep("groups", groups, &mut errors);
    let rows = keep("rows", rows, &mut errors);

    let dataset = Dataset::new(pollutants, groups, rows);
    if dataset.is_usable() {
        return Ok(dataset);
    }

    if errors.is_empty() {
        Err(HydrationError::EmptyResult("direct queries returned no data".into()))
    } else {
        Err(HydrationError::FetchFailed(errors.join("; ")))
    }
}

fn keep<T>(what: &str, result: Result<Vec<T>>, errors: &mut Vec<String>) -> Vec<T> {
    match result {
        Ok(records) => records,
        Err(e) => {
            warn!(query = what, error = %e, "Direct query failed");
            errors.push(format!("{}: {}", what, e));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::{StubGateway, sample_dataset};
    use std::sync::atomic::Ordering;

    async fn selectors(gateway: &StubGateway) -> Result<Arc<Dataset>> {
        fetch_selectors(gateway).await.map(Arc::new)
    }

    #[tokio::test]
    async fn test_fetch_full() {
        let gateway = StubGateway::new(sample_dataset());
        let ds = fetch_full(&gateway, selectors(&gateway)).await.unwrap();
        assert_eq!(ds, sample_dataset());
    }

    #[tokio::test]
    async fn test_fetch_full_queries_each_table_once() {
        let gateway = StubGateway::new(sample_dataset());
        fetch_full(&gateway, selectors(&gateway)).await.unwrap();

        assert_eq!(gateway.pollutant_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.group_calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.row_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_selectors_has_no_rows() {
        let gateway = StubGateway::new(sample_dataset());
        let ds = fetch_selectors(&gateway).await.unwrap();

        assert_eq!(ds.pollutants.len(), 2);
        assert_eq!(ds.groups.len(), 3);
        assert!(ds.rows.is_empty());
        assert_eq!(gateway.row_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fetch_full_empty_result() {
        let gateway = StubGateway::new(Dataset::default());
        let err = fetch_full(&gateway, selectors(&gateway)).await.unwrap_err();
        assert!(matches!(err, HydrationError::EmptyResult(_)));
    }

    #[tokio::test]
    async fn test_fetch_full_unreachable() {
        let gateway = StubGateway::unreachable();
        let err = fetch_full(&gateway, selectors(&gateway)).await.unwrap_err();
        assert!(matches!(err, HydrationError::FetchFailed(_)));
    }

    #[tokio::test]
    async fn test_fetch_direct_scoped() {
        let gateway = StubGateway::new(sample_dataset());
        let ds = fetch_direct(&gateway, &SeriesScope::new(vec![1], vec![]))
            .await
            .unwrap();
        assert_eq!(ds.rows.len(), 2);
        assert!(ds.rows.iter().all(|r| r.pollutant_id == 1));
    }

    #[tokio::test]
    async fn test_fetch_direct_unreachable() {
        let err = fetch_direct(&StubGateway::unreachable(), &SeriesScope::all())
            .await
            .unwrap_err();
        assert!(matches!(err, HydrationError::FetchFailed(ref m) if m.contains("pollutants")));
    }
}
