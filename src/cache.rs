//! In-memory dataset cache and in-flight request deduplication.
//!
//! The [`CacheStore`] holds the one canonical dataset for the process together
//! with its hydration status. The [`RequestDeduplicator`] is the only place
//! that knows whether a fetch is already running: every loader goes through
//! it, so concurrent callers share one pending result instead of issuing
//! duplicate network calls.
//!
//! Both use `std::sync::Mutex` and never hold a guard across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use crate::error::{HydrationError, Result};
use crate::model::{CacheState, CacheStatus, DataSource, Dataset, Hydrated};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct CacheInner {
    status: CacheStatus,
    source: Option<DataSource>,
    data: Option<Arc<Dataset>>,
    generation: u64,
    epoch: u64,
    updated_at: Option<DateTime<Utc>>,
}

/// Process-wide dataset cache.
#[derive(Debug)]
pub struct CacheStore {
    inner: Mutex<CacheInner>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                status: CacheStatus::Empty,
                source: None,
                data: None,
                generation: 0,
                epoch: 0,
                updated_at: None,
            }),
        }
    }

    /// Cached data, if the store holds a partial or full dataset.
    pub fn get(&self) -> Result<Arc<Dataset>> {
        let inner = lock(&self.inner);
        match (&inner.data, inner.status.is_loaded()) {
            (Some(data), true) => Ok(data.clone()),
            _ => Err(HydrationError::NotLoaded),
        }
    }

    /// Cached data with the status and source it was committed under, read
    /// under one lock.
    pub fn hydrated(&self) -> Result<Hydrated> {
        let inner = lock(&self.inner);
        match (&inner.data, inner.source, inner.status.is_loaded()) {
            (Some(data), Some(source), true) => Ok(Hydrated {
                data: data.clone(),
                status: inner.status,
                source,
            }),
            _ => Err(HydrationError::NotLoaded),
        }
    }

    pub fn status(&self) -> CacheStatus {
        lock(&self.inner).status
    }

    pub fn state(&self) -> CacheState {
        let inner = lock(&self.inner);
        CacheState {
            status: inner.status,
            source: inner.source,
            generation: inner.generation,
            updated_at: inner.updated_at,
        }
    }

    /// Invalidation counter. Loads capture it up front and hand it back to
    /// [`CacheStore::commit`] so results from before an invalidation are dropped.
    pub fn epoch(&self) -> u64 {
        lock(&self.inner).epoch
    }

    /// Mark a load as started. Only moves `empty` to `loading`.
    pub fn begin_loading(&self) {
        let mut inner = lock(&self.inner);
        if inner.status == CacheStatus::Empty {
            inner.status = CacheStatus::Loading;
        }
    }

    /// Record a failed load. Only moves `loading` back to `empty`, so cached
    /// data from an earlier tier survives a failed upgrade.
    pub fn fail(&self) {
        let mut inner = lock(&self.inner);
        if inner.status == CacheStatus::Loading {
            inner.status = CacheStatus::Empty;
        }
    }

    /// Store a dataset from `source`.
    ///
    /// Returns the new generation, or `None` if the commit was refused: either
    /// the store was invalidated since `epoch`, or a provisional dataset would
    /// replace the authoritative one.
    pub fn commit(&self, source: DataSource, data: Arc<Dataset>, epoch: u64) -> Option<u64> {
        let mut inner = lock(&self.inner);
        if inner.epoch != epoch {
            debug!(source = source.label(), "Dropping result from before invalidation");
            return None;
        }

        let status = source.yields();
        if inner.status == CacheStatus::Full && status != CacheStatus::Full {
            debug!(
                source = source.label(),
                "Ignoring provisional dataset; full dataset already cached"
            );
            return None;
        }

        inner.status = status;
        inner.source = Some(source);
        inner.data = Some(data);
        inner.generation += 1;
        inner.updated_at = Some(Utc::now());

        info!(
            source = source.label(),
            status = ?status,
            generation = inner.generation,
            "Cache updated"
        );
        Some(inner.generation)
    }

    /// Rebuild the cached partial dataset with `update`, keeping its source.
    ///
    /// Refused unless the store still holds a partial dataset from `epoch`.
    /// Returns the new generation.
    pub fn refresh_partial<F>(&self, epoch: u64, update: F) -> Option<u64>
    where
        F: FnOnce(&Dataset) -> Dataset,
    {
        let mut inner = lock(&self.inner);
        if inner.epoch != epoch || inner.status != CacheStatus::Partial {
            return None;
        }
        let current = inner.data.clone()?;

        inner.data = Some(Arc::new(update(&current)));
        inner.generation += 1;
        inner.updated_at = Some(Utc::now());

        info!(
            source = ?inner.source,
            generation = inner.generation,
            "Partial dataset refreshed"
        );
        Some(inner.generation)
    }

    /// Drop the cached dataset and start a new epoch.
    pub fn invalidate(&self) {
        let mut inner = lock(&self.inner);
        inner.status = CacheStatus::Empty;
        inner.source = None;
        inner.data = None;
        inner.generation += 1;
        inner.epoch += 1;
        inner.updated_at = Some(Utc::now());
        info!(epoch = inner.epoch, "Cache invalidated");
    }
}

/// A pending fetch that every interested caller can await.
pub type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Entry<T: Clone> {
    ticket: u64,
    fetch: SharedFetch<T>,
}

struct Registry<T: Clone> {
    next_ticket: u64,
    in_flight: HashMap<String, Entry<T>>,
}

/// Guarantees at most one in-flight fetch per resource key.
pub struct RequestDeduplicator<T: Clone> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T: Clone> Clone for RequestDeduplicator<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T> Default for RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RequestDeduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_ticket: 0,
                in_flight: HashMap::new(),
            })),
        }
    }

    /// Join the in-flight fetch for `key`, or start one with `start`.
    ///
    /// A new fetch is spawned onto the runtime so it settles even if every
    /// caller drops its handle. Its registration is cleared on settlement,
    /// success or failure, so a failed fetch can be retried.
    pub fn load<F>(&self, key: &str, start: F) -> SharedFetch<T>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let mut registry = lock(&self.registry);
        if let Some(entry) = registry.in_flight.get(key) {
            debug!(key, "Joining in-flight request");
            return entry.fetch.clone();
        }

        registry.next_ticket += 1;
        let ticket = registry.next_ticket;
        let cleanup = self.registry.clone();
        let owned_key = key.to_string();
        let fetch = start();

        let shared = async move {
            let result = fetch.await;
            let mut registry = lock(&cleanup);
            if registry
                .in_flight
                .get(&owned_key)
                .is_some_and(|e| e.ticket == ticket)
            {
                registry.in_flight.remove(&owned_key);
            }
            if let Err(e) = &result {
                warn!(key = %owned_key, error = %e, "Request failed");
            }
            result
        }
        .boxed()
        .shared();

        registry.in_flight.insert(
            key.to_string(),
            Entry {
                ticket,
                fetch: shared.clone(),
            },
        );
        drop(registry);

        debug!(key, "Starting request");
        tokio::spawn(shared.clone());
        shared
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        lock(&self.registry).in_flight.contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.registry).in_flight.len()
    }

    /// Forget every registration. Running fetches still settle, but new
    /// callers start fresh ones.
    pub fn forget_all(&self) {
        lock(&self.registry).in_flight.clear();
    }
}
