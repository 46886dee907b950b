//! In-memory `IconSource` for exercising the scheduler and loader.
//!
//! Outcomes are scripted per identifier and consumed in order; once a
//! script runs dry the default outcome is returned. Every call is recorded
//! with the tokio clock so paused-time tests can assert spacing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use iconpipe_core::{CancelToken, ItemId, ResolutionOutcome};

use crate::source::{BoxFuture, IconSource};

pub struct ScriptedSource {
    scripts: Mutex<HashMap<ItemId, VecDeque<ResolutionOutcome>>>,
    default: Mutex<ResolutionOutcome>,
    latency: Mutex<Duration>,
    calls: Mutex<Vec<(ItemId, Instant)>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedSource {
    /// Every unscripted call answers `Found` with a synthetic URL.
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default: Mutex::new(ResolutionOutcome::Found(String::new())),
            latency: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.lock().expect("scripted lock") = latency;
        self
    }

    pub fn with_default(self, outcome: ResolutionOutcome) -> Self {
        *self.default.lock().expect("scripted lock") = outcome;
        self
    }

    /// Queue outcomes for `id`, returned one per call.
    pub fn script(&self, id: ItemId, outcomes: impl IntoIterator<Item = ResolutionOutcome>) {
        self.scripts
            .lock()
            .expect("scripted lock")
            .entry(id)
            .or_default()
            .extend(outcomes);
    }

    pub fn calls(&self) -> Vec<(ItemId, Instant)> {
        self.calls.lock().expect("scripted lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("scripted lock").len()
    }

    pub fn calls_for(&self, id: ItemId) -> usize {
        self.calls
            .lock()
            .expect("scripted lock")
            .iter()
            .filter(|(called, _)| *called == id)
            .count()
    }

    /// Highest number of calls observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, id: ItemId) -> ResolutionOutcome {
        let scripted = self
            .scripts
            .lock()
            .expect("scripted lock")
            .get_mut(&id)
            .and_then(VecDeque::pop_front);
        match scripted {
            Some(outcome) => outcome,
            None => match &*self.default.lock().expect("scripted lock") {
                ResolutionOutcome::Found(url) if url.is_empty() => {
                    ResolutionOutcome::Found(format!("https://icons.test/{id}.png"))
                }
                other => other.clone(),
            },
        }
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl IconSource for ScriptedSource {
    fn resolve(&self, id: ItemId, cancel: CancelToken) -> BoxFuture<'_, ResolutionOutcome> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return ResolutionOutcome::Cancelled;
            }
            self.calls
                .lock()
                .expect("scripted lock")
                .push((id, Instant::now()));
            let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now_active, Ordering::SeqCst);
            let _guard = ActiveGuard(&self.active);

            let latency = *self.latency.lock().expect("scripted lock");
            if !latency.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return ResolutionOutcome::Cancelled,
                    _ = tokio::time::sleep(latency) => {}
                }
            }
            self.next_outcome(id)
        })
    }
}
