//! Scoped "hero" fetch for fast first paint.
//!
//! Pulls only the series for the default pollutant/group selection. The
//! pollutant and group lists come from the shared selector fetch, so the hero
//! never queries them on its own.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use super::{RemoteDataGateway, SeriesScope};
use crate::error::{HydrationError, Result};
use crate::model::Dataset;

/// Fetch the hero dataset for `scope`.
///
/// `selectors` resolves to the complete pollutant and group lists; the hero
/// dataset keeps only the entries inside the scope.
pub async fn fetch_hero<S>(
    gateway: &dyn RemoteDataGateway,
    scope: &SeriesScope,
    selectors: S,
) -> Result<Dataset>
where
    S: Future<Output = Result<Arc<Dataset>>>,
{
    if scope.is_all() {
        return Err(HydrationError::SourceUnavailable(
            "hero scope not configured".into(),
        ));
    }

    let (selectors, rows) = tokio::try_join!(selectors, gateway.series_rows(scope))?;

    let pollutants = selectors
        .pollutants
        .iter()
        .filter(|p| {
            scope.pollutant_ids.is_empty() || p.id.is_some_and(|id| scope.pollutant_ids.contains(&id))
        })
        .cloned()
        .collect();
    let groups = selectors
        .groups
        .iter()
        .filter(|g| scope.group_ids.is_empty() || g.id.is_some_and(|id| scope.group_ids.contains(&id)))
        .cloned()
        .collect();
    let rows: Vec<_> = rows.into_iter().filter(|r| scope.contains(r)).collect();

    let dataset = Dataset::new(pollutants, groups, rows);
    info!(
        pollutants = dataset.pollutants.len(),
        groups = dataset.groups.len(),
        rows = dataset.rows.len(),
        "Hero fetch complete"
    );
    Ok(dataset)
}
