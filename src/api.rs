//! HTTP API handlers for Plume.
//!
//! - **GET /data**: load the dataset through every tier and return it
//! - **GET /data/cached**: return the cached dataset without loading
//! - **GET /data/status**: hydration status of the cache
//! - **POST /data/invalidate**: drop the cache
//! - **GET /groups/active**: groups with usable activity data
//! - **GET /health**: liveness
//!
//! All logging uses structured tracing fields.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::coverage::CoverageReport;
use crate::error::HydrationError;
use crate::model::{DataResponse, StatusResponse};
use crate::service::DataService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: DataService,
}

/// Build the router with all endpoints.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/data", get(get_data))
        .route("/data/cached", get(get_cached_data))
        .route("/data/status", get(get_status))
        .route("/data/invalidate", post(post_invalidate))
        .route("/groups/active", get(get_active_groups))
        .route("/health", get(health_check))
        .with_state(state)
}

/// HTTP form of a [`HydrationError`].
pub struct ApiError(HydrationError);

impl From<HydrationError> for ApiError {
    fn from(err: HydrationError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            HydrationError::NotLoaded => (StatusCode::NOT_FOUND, "not_loaded"),
            HydrationError::SourceUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "source_unavailable")
            }
            HydrationError::FetchFailed(_) => (StatusCode::BAD_GATEWAY, "fetch_failed"),
            HydrationError::EmptyResult(_) => (StatusCode::BAD_GATEWAY, "empty_result"),
        };
        let body = Json(json!({ "error": kind, "message": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// GET /data - Load the dataset.
///
/// Returns as soon as any tier produced usable data; `full` tells whether
/// it is the authoritative dataset.
#[instrument(skip(state))]
pub async fn get_data(State(state): State<AppState>) -> Result<Json<DataResponse>, ApiError> {
    match state.service.load().await {
        Ok(hydrated) => {
            let response = DataResponse::from(hydrated);
            info!(
                status = ?response.status,
                source = ?response.source,
                rows = response.data.rows.len(),
                "Data served"
            );
            Ok(Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Failed to load data");
            Err(e.into())
        }
    }
}

/// GET /data/cached - Cached dataset, 404 if nothing is loaded.
#[instrument(skip(state))]
pub async fn get_cached_data(
    State(state): State<AppState>,
) -> Result<Json<DataResponse>, ApiError> {
    let cached = state.service.get_cached()?;
    Ok(Json(cached.into()))
}

/// GET /data/status - Hydration status.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.service.state().into())
}

/// POST /data/invalidate - Drop the cache.
#[instrument(skip(state))]
pub async fn post_invalidate(State(state): State<AppState>) -> StatusCode {
    state.service.invalidate();
    info!("Cache invalidated via API");
    StatusCode::NO_CONTENT
}

/// GET /groups/active - Groups offered for emission-factor analysis.
#[instrument(skip(state))]
pub async fn get_active_groups(
    State(state): State<AppState>,
) -> Result<Json<CoverageReport>, ApiError> {
    let report = state.service.active_groups()?;
    info!(
        active = report.active.len(),
        inactive = report.inactive_count,
        mode = ?report.mode,
        fallback = report.fallback,
        "Active groups queried"
    );
    Ok(Json(report))
}

/// GET /health - Simple health check endpoint.
pub async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}
