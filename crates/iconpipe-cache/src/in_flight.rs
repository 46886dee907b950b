//! In-flight registry entries and the handles that wait on them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::watch;
use tracing::debug;

use iconpipe_core::{CacheEntry, CancelToken, ItemId, ResolutionOutcome};

use crate::cache::store_entry;

pub(crate) type Registry = Arc<Mutex<HashMap<ItemId, Arc<InFlight>>>>;

/// One shared remote resolution.
pub(crate) struct InFlight {
    /// Cancels the shared work; fired when the last waiter leaves.
    pub(crate) token: CancelToken,
    outcome: watch::Sender<Option<ResolutionOutcome>>,
    /// Live handles. Only changed while the registry lock is held.
    waiters: AtomicUsize,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        let (outcome, _rx) = watch::channel(None);
        Self {
            token: CancelToken::new(),
            outcome,
            waiters: AtomicUsize::new(0),
        }
    }

    fn is_settled(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

/// A caller's interest in a shared resolution.
///
/// Dropping the handle withdraws that interest. When the last handle goes
/// away before the work settles, the shared work is cancelled.
pub struct InFlightHandle {
    id: ItemId,
    entry: Arc<InFlight>,
    registry: Registry,
    rx: watch::Receiver<Option<ResolutionOutcome>>,
}

impl InFlightHandle {
    /// Register a new waiter. The caller holds the registry lock.
    pub(crate) fn join(id: ItemId, entry: Arc<InFlight>, registry: Registry) -> Self {
        entry.waiters.fetch_add(1, Ordering::SeqCst);
        let rx = entry.outcome.subscribe();
        Self {
            id,
            entry,
            registry,
            rx,
        }
    }

    /// A handle whose outcome is already known.
    pub(crate) fn settled(id: ItemId, outcome: ResolutionOutcome, registry: Registry) -> Self {
        let entry = Arc::new(InFlight::new());
        entry.outcome.send_replace(Some(outcome));
        Self::join(id, entry, registry)
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Wait for the shared outcome, or for `cancel` to fire.
    ///
    /// A cancelled waiter receives `Cancelled`; the shared work keeps
    /// running for everyone else.
    pub async fn wait(mut self, cancel: &CancelToken) -> ResolutionOutcome {
        if cancel.is_cancelled() {
            return ResolutionOutcome::Cancelled;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => ResolutionOutcome::Cancelled,
            outcome = recv_outcome(&mut self.rx) => outcome,
        }
    }
}

async fn recv_outcome(rx: &mut watch::Receiver<Option<ResolutionOutcome>>) -> ResolutionOutcome {
    match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome)
            .clone()
            .unwrap_or_else(|| ResolutionOutcome::Transient("empty in-flight outcome".into())),
        Err(_) => ResolutionOutcome::Transient("in-flight resolution dropped".into()),
    }
}

impl Drop for InFlightHandle {
    fn drop(&mut self) {
        let _registry = self.registry.lock().expect("in-flight lock");
        let remaining = self.entry.waiters.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 && !self.entry.is_settled() {
            debug!(id = %self.id, "last waiter left, cancelling in-flight resolution");
            self.entry.token.cancel();
        }
    }
}

/// Publishes the outcome of a spawned resolution exactly once.
///
/// If the task is dropped before settling (panic, runtime shutdown) the
/// waiters still receive a transient outcome.
pub(crate) struct Settler {
    id: ItemId,
    entry: Arc<InFlight>,
    registry: Registry,
    resolved: Arc<RwLock<HashMap<ItemId, CacheEntry>>>,
    done: bool,
}

impl Settler {
    pub(crate) fn new(
        id: ItemId,
        entry: Arc<InFlight>,
        registry: Registry,
        resolved: Arc<RwLock<HashMap<ItemId, CacheEntry>>>,
    ) -> Self {
        Self {
            id,
            entry,
            registry,
            resolved,
            done: false,
        }
    }

    pub(crate) fn settle(&mut self, outcome: ResolutionOutcome) {
        if self.done {
            return;
        }
        self.done = true;

        // Cache first so a caller registering after removal finds it.
        store_entry(&self.resolved, self.id, &outcome);
        {
            let mut registry = self.registry.lock().expect("in-flight lock");
            if registry
                .get(&self.id)
                .is_some_and(|current| Arc::ptr_eq(current, &self.entry))
            {
                registry.remove(&self.id);
            }
        }
        debug!(id = %self.id, outcome = outcome.label(), "in-flight resolution settled");
        self.entry.outcome.send_replace(Some(outcome));
    }
}

impl Drop for Settler {
    fn drop(&mut self) {
        if !self.done {
            self.settle(ResolutionOutcome::Transient("resolution task aborted".into()));
        }
    }
}
