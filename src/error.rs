//! Error kinds for the hydration pipeline.

use thiserror::Error;

/// Errors surfaced by caches, sources and the data service.
///
/// `Clone` because a single pending fetch is shared by every caller that
/// asked for the same key, and each of them receives the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HydrationError {
    /// Cache read before any load completed.
    #[error("data not loaded")]
    NotLoaded,

    /// Gateway or snapshot location is not configured.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// Network or query failure. Retryable.
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    /// The query succeeded but returned nothing usable.
    #[error("empty result: {0}")]
    EmptyResult(String),
}

impl From<reqwest::Error> for HydrationError {
    fn from(err: reqwest::Error) -> Self {
        HydrationError::FetchFailed(err.to_string())
    }
}

impl From<serde_json::Error> for HydrationError {
    fn from(err: serde_json::Error) -> Self {
        HydrationError::FetchFailed(format!("invalid payload: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, HydrationError>;
