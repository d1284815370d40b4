//! Plume - progressive hydration of emissions datasets.
//!
//! # API Endpoints
//!
//! - `GET /data` - Load the dataset (cache, race, bulk, direct)
//! - `GET /data/cached` - Cached dataset only
//! - `GET /data/status` - Hydration status
//! - `POST /data/invalidate` - Drop the cache
//! - `GET /groups/active` - Groups with activity data
//! - `GET /health` - Health check

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use plume::api::{AppState, router};
use plume::config::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("plume=info".parse()?))
        .init();

    let config = ServiceConfig::from_env();
    info!(
        port = config.port,
        gateway = config.gateway_url.is_some(),
        snapshot = config.snapshot_url.is_some() || config.snapshot_path.is_some(),
        hero = !config.hero_scope.is_all(),
        "Starting Plume server"
    );

    let service = config.build_service();
    service.init();

    // Log upgrades for the lifetime of the process
    let _hydrated = service.on_hydrated(|event| {
        info!(
            generation = event.generation,
            pollutants = event.pollutant_count,
            groups = event.group_count,
            rows = event.row_count,
            "Full dataset hydrated"
        );
    });

    // Warm the cache in the background so the first request is served quickly
    let warm = service.clone();
    tokio::spawn(async move {
        if let Err(e) = warm.load_data().await {
            warn!(error = %e, "Initial load failed; will retry on first request");
        }
    });

    let app = router(AppState { service })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Plume is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
