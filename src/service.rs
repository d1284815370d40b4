//! The data service: tiered hydration behind one consumer API.
//!
//! # Tiers
//!
//! [`DataService::load_data`] tries, in order:
//!
//! 1. the in-memory cache from a prior load
//! 2. a race between the bootstrap, the static snapshot and the hero fetch
//! 3. the bulk (bootstrap) load on its own
//! 4. the direct per-endpoint fallback
//!
//! A provisional race winner is layered under the selector metadata and
//! cached as `partial`. The bootstrap keeps running in the background; when
//! it lands the cache becomes `full` and hydration listeners fire.
//!
//! The pollutant and group lists are one shared fetch that both the
//! bootstrap and the hero join. When they land while a provisional dataset
//! is cached, they are merged into it right away.
//!
//! Every fetch goes through the [`RequestDeduplicator`], so concurrent
//! `load_data` calls never duplicate network requests.

use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStore, RequestDeduplicator, SharedFetch};
use crate::coverage::{self, CoverageReport};
use crate::error::{HydrationError, Result};
use crate::merge::merge_datasets;
use crate::model::{CacheState, CacheStatus, DataSource, Dataset, Hydrated};
use crate::notifier::{HydrationEvent, HydrationNotifier, Subscription};
use crate::race::{Candidate, RaceOutcome, race};
use crate::sources::{RemoteDataGateway, SeriesScope, SnapshotClient, bootstrap, hero};

/// Dedup key for the authoritative bulk fetch.
pub const FULL_KEY: &str = "full";

/// Dedup key for the static snapshot.
pub const SNAPSHOT_KEY: &str = "snapshot";

/// Dedup key for the pollutant and group lists.
pub const SELECTORS_KEY: &str = "selectors";

/// Dedup key for the hero fetch.
pub const HERO_KEY: &str = "hero";

/// Dedup key for the direct fallback.
pub const DIRECT_KEY: &str = "direct";

struct ServiceInner {
    gateway: Option<Arc<dyn RemoteDataGateway>>,
    snapshot: Option<SnapshotClient>,
    hero_scope: Option<SeriesScope>,
    cache: CacheStore,
    requests: RequestDeduplicator<Arc<Dataset>>,
    notifier: HydrationNotifier,
    selector_metadata: Mutex<Option<Arc<Dataset>>>,
}

/// Builder for [`DataService`].
#[derive(Default)]
pub struct DataServiceBuilder {
    gateway: Option<Arc<dyn RemoteDataGateway>>,
    snapshot: Option<SnapshotClient>,
    hero_scope: Option<SeriesScope>,
}

impl DataServiceBuilder {
    /// Set the remote data gateway.
    pub fn gateway(mut self, gateway: Arc<dyn RemoteDataGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Set the static snapshot source.
    pub fn snapshot(mut self, snapshot: SnapshotClient) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Set the hero scope. An unrestricted scope disables the hero fetch.
    pub fn hero_scope(mut self, scope: SeriesScope) -> Self {
        self.hero_scope = (!scope.is_all()).then_some(scope);
        self
    }

    pub fn build(self) -> DataService {
        DataService {
            inner: Arc::new(ServiceInner {
                gateway: self.gateway,
                snapshot: self.snapshot,
                hero_scope: self.hero_scope,
                cache: CacheStore::new(),
                requests: RequestDeduplicator::new(),
                notifier: HydrationNotifier::new(),
                selector_metadata: Mutex::new(None),
            }),
        }
    }
}

/// Process-wide data service. Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct DataService {
    inner: Arc<ServiceInner>,
}

impl DataService {
    pub fn builder() -> DataServiceBuilder {
        DataServiceBuilder::default()
    }

    /// Start a session: empty cache, nothing in flight.
    pub fn init(&self) {
        self.reset();
        info!(
            gateway = self.inner.gateway.is_some(),
            snapshot = self.inner.snapshot.is_some(),
            hero = self.inner.hero_scope.is_some(),
            "Data service initialized"
        );
    }

    /// Drop all cached data so the next load starts from scratch.
    pub fn invalidate(&self) {
        self.reset();
    }

    fn reset(&self) {
        self.inner.cache.invalidate();
        self.inner.requests.forget_all();
        *self.selector_lock() = None;
    }

    fn selector_lock(&self) -> std::sync::MutexGuard<'_, Option<Arc<Dataset>>> {
        self.inner
            .selector_metadata
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn gateway(&self) -> Result<Arc<dyn RemoteDataGateway>> {
        self.inner.gateway.clone().ok_or_else(|| {
            HydrationError::SourceUnavailable("data service gateway not configured".into())
        })
    }

    /// Whether any dataset (partial or full) is cached.
    pub fn is_loaded(&self) -> bool {
        self.inner.cache.status().is_loaded()
    }

    /// Whether the authoritative dataset is cached.
    pub fn is_full(&self) -> bool {
        self.inner.cache.status() == CacheStatus::Full
    }

    pub fn state(&self) -> CacheState {
        self.inner.cache.state()
    }

    /// Cached dataset, or [`HydrationError::NotLoaded`].
    pub fn get_cached_data(&self) -> Result<Arc<Dataset>> {
        self.inner.cache.get()
    }

    /// Cached dataset with its status and source, or [`HydrationError::NotLoaded`].
    pub fn get_cached(&self) -> Result<Hydrated> {
        self.inner.cache.hydrated()
    }

    /// Subscribe to full-dataset arrival.
    pub fn on_hydrated<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HydrationEvent) + Send + Sync + 'static,
    {
        let subscription = self.inner.notifier.subscribe(listener);
        debug!(
            listeners = self.inner.notifier.listener_count(),
            "Hydration listener added"
        );
        subscription
    }

    /// Selector metadata gathered so far, if any.
    pub fn selector_metadata(&self) -> Option<Arc<Dataset>> {
        self.selector_lock().clone()
    }

    /// Groups to offer for emission-factor analysis.
    ///
    /// Uses activity series once the full dataset is cached, the provisional
    /// per-group flags before that.
    pub fn active_groups(&self) -> Result<CoverageReport> {
        let cached = self.get_cached()?;
        Ok(coverage::classify(&cached.data, cached.is_full()))
    }

    /// Load the dataset, returning as soon as any tier has something usable.
    pub async fn load_data(&self) -> Result<Arc<Dataset>> {
        self.load().await.map(|hydrated| hydrated.data)
    }

    /// Like [`DataService::load_data`], but also reports whether the dataset
    /// is provisional and which tier produced it.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<Hydrated> {
        let cache = &self.inner.cache;

        if let Ok(cached) = cache.hydrated() {
            debug!(status = ?cached.status, "Serving cached dataset");
            if !cached.is_full() {
                self.start_upgrade();
            }
            return Ok(cached);
        }

        let epoch = cache.epoch();
        cache.begin_loading();
        debug!(
            in_flight = self.inner.requests.in_flight_count(),
            "Starting tiered load"
        );

        match race(self.candidates()).await {
            RaceOutcome::Winner { source, data } => {
                info!(source = source.label(), "Initial data source won");
                return Ok(self.commit_provisional(source, data, epoch));
            }
            RaceOutcome::None { failures } => {
                for (source, error) in &failures {
                    warn!(source = source.label(), error = %error, "Initial data source unusable");
                }
            }
        }

        if self.inner.gateway.is_none() {
            cache.fail();
            return Err(HydrationError::SourceUnavailable(
                "no usable snapshot and no gateway configured".into(),
            ));
        }

        match self.load_full().await {
            Ok(data) => return Ok(self.authoritative(data)),
            Err(e) => warn!(error = %e, "Bulk load failed; trying direct queries"),
        }

        match self.load_direct().await {
            Ok(data) => return Ok(self.commit_provisional(DataSource::Direct, data, epoch)),
            Err(e) => warn!(error = %e, "Direct load failed"),
        }

        cache.fail();
        Err(HydrationError::FetchFailed(
            "all data sources failed".into(),
        ))
    }

    /// The bootstrap result as cached, or as fetched if it was not committed.
    fn authoritative(&self, data: Arc<Dataset>) -> Hydrated {
        self.inner.cache.hydrated().unwrap_or(Hydrated {
            data,
            status: CacheStatus::Full,
            source: DataSource::Bootstrap,
        })
    }

    /// Cache a provisional dataset, merged under the selector metadata.
    ///
    /// If the full dataset already landed, that is returned instead.
    fn commit_provisional(&self, source: DataSource, data: Arc<Dataset>, epoch: u64) -> Hydrated {
        if source == DataSource::Bootstrap {
            return self.authoritative(data);
        }

        let merged = match self.selector_metadata() {
            Some(meta) => Arc::new(merge_datasets(&meta, &data)),
            None => data,
        };

        let provisional = Hydrated {
            data: merged.clone(),
            status: CacheStatus::Partial,
            source,
        };
        match self.inner.cache.commit(source, merged, epoch) {
            Some(_) => {
                self.start_upgrade();
                provisional
            }
            None => self.inner.cache.hydrated().unwrap_or(provisional),
        }
    }

    fn candidates(&self) -> Vec<Candidate> {
        let mut candidates = Vec::new();

        if self.inner.gateway.is_some() {
            let fetch = self.load_full();
            candidates.push(Candidate::new(DataSource::Bootstrap, fetch));
        }
        if let Some(fetch) = self.load_snapshot() {
            candidates.push(Candidate::new(DataSource::Snapshot, fetch));
        }
        if let Some(fetch) = self.load_hero() {
            candidates.push(Candidate::new(DataSource::Hero, fetch));
        }

        candidates
    }

    /// Kick off the bulk fetch in the background if the gateway is available.
    fn start_upgrade(&self) {
        if self.inner.gateway.is_some()
            && !self.is_full()
            && !self.inner.requests.is_in_flight(FULL_KEY)
        {
            drop(self.load_full());
        }
    }

    /// The deduplicated pollutant and group lists, shared by the bulk and
    /// hero fetches. Lists already gathered this epoch are reused.
    fn load_selectors(&self) -> SharedFetch<Arc<Dataset>> {
        let service = self.clone();
        self.inner.requests.load(SELECTORS_KEY, move || {
            async move {
                if let Some(meta) = service.selector_metadata() {
                    return Ok(meta);
                }
                let epoch = service.inner.cache.epoch();
                let gateway = service.gateway()?;
                let meta = Arc::new(bootstrap::fetch_selectors(gateway.as_ref()).await?);
                service.store_selectors(meta.clone(), epoch);
                Ok(meta)
            }
            .boxed()
        })
    }

    /// Keep the selector lists and fold them into a cached partial dataset,
    /// so selectors are complete before the bulk fetch lands.
    fn store_selectors(&self, meta: Arc<Dataset>, epoch: u64) {
        let mut stored = self.selector_lock();
        if self.inner.cache.epoch() != epoch {
            return;
        }
        *stored = Some(meta.clone());
        drop(stored);

        let refreshed = self
            .inner
            .cache
            .refresh_partial(epoch, |cached| merge_datasets(&meta, cached));
        if let Some(generation) = refreshed {
            debug!(generation, "Selector lists merged into provisional dataset");
        }
    }

    /// The deduplicated bulk fetch. Commits `full` and notifies on success.
    fn load_full(&self) -> SharedFetch<Arc<Dataset>> {
        let service = self.clone();
        self.inner.requests.load(FULL_KEY, move || {
            async move {
                let epoch = service.inner.cache.epoch();
                let gateway = service.gateway()?;
                let selectors = service.load_selectors();
                let data = Arc::new(bootstrap::fetch_full(gateway.as_ref(), selectors).await?);

                if let Some(generation) =
                    service
                        .inner
                        .cache
                        .commit(DataSource::Bootstrap, data.clone(), epoch)
                {
                    service.inner.notifier.notify(&HydrationEvent::new(
                        generation,
                        DataSource::Bootstrap,
                        &data,
                    ));
                }
                Ok(data)
            }
            .boxed()
        })
    }

    fn load_snapshot(&self) -> Option<SharedFetch<Arc<Dataset>>> {
        let snapshot = self.inner.snapshot.clone()?;
        Some(self.inner.requests.load(SNAPSHOT_KEY, move || {
            async move { snapshot.load().await.map(Arc::new) }.boxed()
        }))
    }

    /// The deduplicated hero fetch. Its selector lists come from
    /// [`DataService::load_selectors`] and outlive the hero dataset.
    fn load_hero(&self) -> Option<SharedFetch<Arc<Dataset>>> {
        let scope = self.inner.hero_scope.clone()?;
        let gateway = self.inner.gateway.clone()?;
        let service = self.clone();
        Some(self.inner.requests.load(HERO_KEY, move || {
            async move {
                let selectors = service.load_selectors();
                hero::fetch_hero(gateway.as_ref(), &scope, selectors)
                    .await
                    .map(Arc::new)
            }
            .boxed()
        }))
    }

    fn load_direct(&self) -> SharedFetch<Arc<Dataset>> {
        let service = self.clone();
        let scope = self.inner.hero_scope.clone().unwrap_or_default();
        self.inner.requests.load(DIRECT_KEY, move || {
            async move {
                let gateway = service.gateway()?;
                bootstrap::fetch_direct(gateway.as_ref(), &scope)
                    .await
                    .map(Arc::new)
            }
            .boxed()
        })
    }
}
