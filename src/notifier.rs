//! Publish/subscribe for "the authoritative dataset has arrived".
//!
//! Consumers that rendered from a provisional dataset subscribe here to
//! re-render once the full dataset replaces it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};

use crate::model::{DataSource, Dataset};

/// Delivered to listeners when a full dataset is committed.
#[derive(Debug, Clone, Serialize)]
pub struct HydrationEvent {
    /// Cache generation the dataset was committed under.
    pub generation: u64,
    pub source: DataSource,
    pub pollutant_count: usize,
    pub group_count: usize,
    pub row_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl HydrationEvent {
    pub fn new(generation: u64, source: DataSource, data: &Dataset) -> Self {
        Self {
            generation,
            source,
            pollutant_count: data.pollutants.len(),
            group_count: data.groups.len(),
            row_count: data.rows.len(),
            timestamp: Utc::now(),
        }
    }
}

type Listener = Arc<dyn Fn(&HydrationEvent) + Send + Sync>;

struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Listener)>,
    last_generation: Option<u64>,
}

fn lock(mutex: &Mutex<Listeners>) -> MutexGuard<'_, Listeners> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of hydration listeners.
#[derive(Clone)]
pub struct HydrationNotifier {
    inner: Arc<Mutex<Listeners>>,
}

impl Default for HydrationNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl HydrationNotifier {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
                last_generation: None,
            })),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&HydrationEvent) + Send + Sync + 'static,
    {
        let mut inner = lock(&self.inner);
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.push((id, Arc::new(listener)));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner).entries.len()
    }

    /// Deliver `event` to every listener in registration order.
    ///
    /// A generation is delivered at most once; repeats return 0. A panicking
    /// listener is logged and skipped. Returns the number of listeners that
    /// completed normally.
    pub fn notify(&self, event: &HydrationEvent) -> usize {
        let listeners: Vec<Listener> = {
            let mut inner = lock(&self.inner);
            if inner.last_generation == Some(event.generation) {
                debug!(generation = event.generation, "Hydration already announced");
                return 0;
            }
            inner.last_generation = Some(event.generation);
            inner.entries.iter().map(|(_, l)| l.clone()).collect()
        };

        let mut delivered = 0;
        for (position, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(
                    listener = position,
                    generation = event.generation,
                    "Hydration listener panicked"
                ),
            }
        }

        debug!(
            generation = event.generation,
            delivered,
            total = listeners.len(),
            "Hydration announced"
        );
        delivered
    }
}

/// Handle returned by [`HydrationNotifier::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Remove the listener. A no-op once the notifier is gone.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).entries.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(generation: u64) -> HydrationEvent {
        HydrationEvent::new(generation, DataSource::Bootstrap, &Dataset::default())
    }

    #[test]
    fn test_listeners_called_in_order_despite_panic() {
        let notifier = HydrationNotifier::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let first = calls.clone();
        notifier.subscribe(move |_| {
            first.lock().unwrap().push("first");
            panic!("listener failure");
        });
        let second = calls.clone();
        notifier.subscribe(move |_| second.lock().unwrap().push("second"));

        let delivered = notifier.notify(&event(1));

        assert_eq!(delivered, 1);
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_same_generation_fires_once() {
        let notifier = HydrationNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        notifier.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        notifier.notify(&event(3));
        notifier.notify(&event(3));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        notifier.notify(&event(4));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let notifier = HydrationNotifier::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = notifier.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(notifier.listener_count(), 1);

        sub.unsubscribe();
        assert_eq!(notifier.listener_count(), 0);

        notifier.notify(&event(1));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_after_notifier_dropped() {
        let notifier = HydrationNotifier::new();
        let sub = notifier.subscribe(|_| {});
        drop(notifier);
        sub.unsubscribe();
    }

    #[test]
    fn test_event_counts() {
        let data = crate::sources::testing::sample_dataset();
        let e = HydrationEvent::new(2, DataSource::Bootstrap, &data);
        assert_eq!(e.pollutant_count, 2);
        assert_eq!(e.group_count, 3);
        assert_eq!(e.row_count, 5);
    }
}
