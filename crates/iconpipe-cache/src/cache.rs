//! Process-lifetime resolution cache.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tracing::debug;

use iconpipe_core::{CacheEntry, CancelToken, ItemId, ResolutionOutcome};

use crate::in_flight::{InFlight, InFlightHandle, Registry, Settler};

/// Authoritative memory of resolved identifiers and of work in flight.
///
/// Cloning is cheap; clones share the same maps.
#[derive(Clone, Default)]
pub struct ResolutionCache {
    resolved: Arc<RwLock<HashMap<ItemId, CacheEntry>>>,
    in_flight: Registry,
}

impl ResolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, id: ItemId) -> Option<CacheEntry> {
        let resolved = self.resolved.read().expect("cache lock");
        resolved.get(&id).cloned()
    }

    /// Record an outcome. Only `Found` and `NotFound` are kept, and an
    /// existing entry is never replaced. Returns whether anything was
    /// written.
    pub fn store(&self, id: ItemId, outcome: &ResolutionOutcome) -> bool {
        store_entry(&self.resolved, id, outcome)
    }

    /// Join the in-flight resolution for `id`, or start one.
    ///
    /// `factory` runs only when no live entry exists. It receives the
    /// shared cancellation token, which fires once every handle has been
    /// dropped or has given up waiting. The future is spawned on the
    /// current tokio runtime.
    pub fn get_or_create_in_flight<F, Fut>(&self, id: ItemId, factory: F) -> InFlightHandle
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = ResolutionOutcome> + Send + 'static,
    {
        let mut registry = self.in_flight.lock().expect("in-flight lock");

        // A result may have landed between the caller's lookup and now.
        if let Some(entry) = self.lookup(id) {
            debug!(%id, "resolved while registering, skipping remote call");
            return InFlightHandle::settled(id, entry.into_outcome(), self.in_flight.clone());
        }

        if let Some(existing) = registry.get(&id) {
            if !existing.token.is_cancelled() {
                debug!(%id, "joining in-flight resolution");
                return InFlightHandle::join(id, Arc::clone(existing), self.in_flight.clone());
            }
            debug!(%id, "replacing abandoned in-flight resolution");
        }

        let entry = Arc::new(InFlight::new());
        registry.insert(id, Arc::clone(&entry));
        let handle = InFlightHandle::join(id, Arc::clone(&entry), self.in_flight.clone());
        drop(registry);

        let work = factory(entry.token.clone());
        let mut settler = Settler::new(id, entry, self.in_flight.clone(), self.resolved.clone());
        tokio::spawn(async move {
            let outcome = work.await;
            settler.settle(outcome);
        });

        handle
    }

    /// Number of cached identifiers.
    pub fn len(&self) -> usize {
        self.resolved.read().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of identifiers with a live remote resolution.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight lock").len()
    }

    /// Drop every cached entry. In-flight work is unaffected.
    pub fn clear(&self) {
        self.resolved.write().expect("cache lock").clear();
    }
}

pub(crate) fn store_entry(
    resolved: &RwLock<HashMap<ItemId, CacheEntry>>,
    id: ItemId,
    outcome: &ResolutionOutcome,
) -> bool {
    let Some(entry) = CacheEntry::from_outcome(outcome) else {
        return false;
    };
    let mut resolved = resolved.write().expect("cache lock");
    match resolved.get(&id) {
        Some(existing) => {
            if *existing != entry {
                debug!(%id, kept = ?existing, ignored = ?entry, "ignoring conflicting cache write");
            }
            false
        }
        None => {
            debug!(%id, outcome = outcome.label(), "cached resolution");
            resolved.insert(id, entry);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn id(raw: u32) -> ItemId {
        ItemId::new(raw).unwrap()
    }

    #[test]
    fn store_keeps_authoritative_outcomes_only() {
        let cache = ResolutionCache::new();
        assert!(!cache.store(id(1), &ResolutionOutcome::Transient("timeout".into())));
        assert!(!cache.store(id(1), &ResolutionOutcome::QuotaExceeded));
        assert!(!cache.store(id(1), &ResolutionOutcome::Cancelled));
        assert!(cache.lookup(id(1)).is_none());

        assert!(cache.store(id(1), &ResolutionOutcome::Found("https://cdn/1.png".into())));
        assert_eq!(cache.lookup(id(1)), Some(CacheEntry::Found("https://cdn/1.png".into())));
    }

    #[test]
    fn negative_entry_is_never_overwritten() {
        let cache = ResolutionCache::new();
        assert!(cache.store(id(999_999), &ResolutionOutcome::NotFound));
        assert!(!cache.store(id(999_999), &ResolutionOutcome::Transient("503".into())));
        assert!(!cache.store(id(999_999), &ResolutionOutcome::Found("late".into())));
        assert_eq!(cache.lookup(id(999_999)), Some(CacheEntry::NotFound));
    }

    #[test]
    fn clear_empties_cache() {
        let cache = ResolutionCache::new();
        cache.store(id(3), &ResolutionOutcome::NotFound);
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_resolution() {
        let cache = ResolutionCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| {
            move |_token: CancelToken| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                ResolutionOutcome::Found("https://cdn/500.png".into())
            }
        };

        let first = cache.get_or_create_in_flight(id(500), make(calls.clone()));
        let second = cache.get_or_create_in_flight(id(500), make(calls.clone()));
        assert_eq!(cache.in_flight_count(), 1);

        let a = CancelToken::new();
        let b = CancelToken::new();
        let (ra, rb) = tokio::join!(first.wait(&a), second.wait(&b));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ra, rb);
        assert_eq!(cache.lookup(id(500)), Some(CacheEntry::Found("https://cdn/500.png".into())));
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn registration_after_settle_uses_cache() {
        let cache = ResolutionCache::new();
        cache.store(id(8), &ResolutionOutcome::NotFound);

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handle = cache.get_or_create_in_flight(id(8), move |_token| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            ResolutionOutcome::Found("stale".into())
        });
        assert_eq!(handle.wait(&CancelToken::new()).await, ResolutionOutcome::NotFound);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn transient_outcome_is_shared_but_not_cached() {
        let cache = ResolutionCache::new();
        let handle = cache.get_or_create_in_flight(id(9), |_token| async {
            ResolutionOutcome::Transient("connection reset".into())
        });
        let outcome = handle.wait(&CancelToken::new()).await;
        assert!(matches!(outcome, ResolutionOutcome::Transient(_)));
        assert!(cache.lookup(id(9)).is_none());
    }
}
