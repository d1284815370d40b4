//! First-usable-wins race between initial data suppliers.
//!
//! All candidates start at once. The race resolves with the first candidate
//! whose dataset is usable (pollutants and rows both non-empty); failures and
//! empty payloads simply keep the race open until everything has settled.
//! Candidates that settle in the same scheduling turn are ranked by
//! registration order.
//!
//! Candidates are spawned, so losers keep running after the race resolves.
//! Their side effects (a committed bootstrap, stored selector metadata) stay
//! useful even though their payload lost.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::{HydrationError, Result};
use crate::model::{DataSource, Dataset};

/// One supplier entered into the race.
pub struct Candidate {
    pub source: DataSource,
    future: BoxFuture<'static, Result<Arc<Dataset>>>,
}

impl Candidate {
    pub fn new<F>(source: DataSource, future: F) -> Self
    where
        F: Future<Output = Result<Arc<Dataset>>> + Send + 'static,
    {
        Self {
            source,
            future: future.boxed(),
        }
    }
}

/// How a race ended.
#[derive(Debug)]
pub enum RaceOutcome {
    /// A candidate produced a usable dataset.
    Winner {
        source: DataSource,
        data: Arc<Dataset>,
    },

    /// Every candidate failed or came back empty.
    None {
        failures: Vec<(DataSource, HydrationError)>,
    },
}

/// Run the candidates and resolve with the first usable result.
pub async fn race(candidates: Vec<Candidate>) -> RaceOutcome {
    let mut pending = JoinSet::new();
    for (index, Candidate { source, future }) in candidates.into_iter().enumerate() {
        pending.spawn(async move { (index, source, future.await) });
    }

    let mut failures = Vec::new();

    while let Some(first) = pending.join_next().await {
        // Collect everything else that settled in the same turn.
        let mut batch = vec![first];
        while let Some(Some(next)) = pending.join_next().now_or_never() {
            batch.push(next);
        }

        let mut settled: Vec<_> = batch
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(settled) => Some(settled),
                Err(e) => {
                    warn!(error = %e, "Candidate task aborted");
                    None
                }
            })
            .collect();
        settled.sort_by_key(|(index, _, _)| *index);

        let mut winner = None;
        for (_, source, result) in settled {
            match result {
                Ok(data) if data.is_usable() => {
                    if winner.is_none() {
                        winner = Some(RaceOutcome::Winner { source, data });
                    }
                }
                Ok(_) => {
                    debug!(source = source.label(), "Candidate returned no usable data");
                    failures.push((
                        source,
                        HydrationError::EmptyResult(format!("{} returned no data", source.label())),
                    ));
                }
                Err(e) => {
                    debug!(source = source.label(), error = %e, "Candidate failed");
                    failures.push((source, e));
                }
            }
        }

        if let Some(outcome) = winner {
            // Dropping the set would abort the losers.
            pending.detach_all();
            return outcome;
        }
    }

    RaceOutcome::None { failures }
}
