//! The pipeline: owner of the cache and the scheduler, factory of
//! per-consumer controllers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tracing::info;

use iconpipe_cache::ResolutionCache;
use iconpipe_client::{HttpIconClient, IconSource};
use iconpipe_core::{FallbackScheme, ItemId, PipelineConfig};
use iconpipe_scheduler::{RequestScheduler, SchedulerError, SchedulerSnapshot};

use crate::controller::{Subscription, Wiring, spawn_pair};
use crate::error::{LoadError, LoadResult};
use crate::state::{LoadController, RetryPolicy};

/// Cache sizes plus the scheduler's view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub cached: usize,
    pub in_flight: usize,
    pub scheduler: SchedulerSnapshot,
}

pub struct IconPipeline {
    wiring: Wiring,
    fallbacks: FallbackScheme,
    policy: RetryPolicy,
    stagger_step: Duration,
    /// Stagger positions that stay below the deferral threshold.
    stagger_slots: u32,
    runtime: Handle,
    shut_down: AtomicBool,
}

impl IconPipeline {
    /// Build a pipeline around any `IconSource`. Must be called inside a
    /// tokio runtime.
    pub fn new(source: Arc<dyn IconSource>, config: &PipelineConfig) -> LoadResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|_| LoadError::Scheduler(SchedulerError::NoRuntime))?;
        let scheduler = RequestScheduler::start(source, &config.scheduler)?;
        let defer_threshold = config.loader.defer_threshold()?;
        let stagger_step = config.scheduler.min_interval()?;

        let pipeline = Self {
            wiring: Wiring {
                cache: ResolutionCache::new(),
                scheduler: Arc::new(scheduler),
                defer_threshold,
            },
            fallbacks: FallbackScheme::new(&config.fallback),
            policy: RetryPolicy::from_config(&config.loader)?,
            stagger_step,
            stagger_slots: stagger_slots(stagger_step, defer_threshold),
            runtime,
            shut_down: AtomicBool::new(false),
        };
        info!(base_url = %config.client.base_url, "icon pipeline ready");
        Ok(pipeline)
    }

    /// Build a pipeline that talks to the configured HTTP service.
    pub fn from_config(config: &PipelineConfig) -> LoadResult<Self> {
        let client = HttpIconClient::new(&config.client)?;
        Self::new(Arc::new(client), config)
    }

    /// Validate a raw identifier.
    pub fn item_id(raw: u32) -> LoadResult<ItemId> {
        ItemId::new(raw).ok_or(LoadError::InvalidId(raw))
    }

    /// Start resolving `id` for one consumer.
    ///
    /// `initial_delay` at or above the deferral threshold leaves the
    /// subscription `Idle` until it is rescheduled.
    pub fn request_resolution(
        &self,
        id: ItemId,
        priority: bool,
        initial_delay: Duration,
    ) -> LoadResult<Subscription> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(LoadError::ShutDown);
        }
        let controller = LoadController::new(id, self.fallbacks.candidates(id), self.policy);
        let (task, subscription) = spawn_pair(controller, priority, self.wiring.clone());
        self.runtime.spawn(task.run(initial_delay));
        Ok(subscription)
    }

    pub fn cancel(&self, subscription: &Subscription) {
        subscription.cancel();
    }

    /// Suggested initial delay for the `index`-th element mounted at once,
    /// spreading a burst evenly over the quota window.
    ///
    /// Positions wrap before reaching the deferral threshold, so a staggered
    /// subscription is always scheduled rather than left idle.
    pub fn stagger_delay(&self, index: usize) -> Duration {
        let slot = index % self.stagger_slots as usize;
        self.stagger_step * slot as u32
    }

    pub fn fallback_candidates(&self, id: ItemId) -> Vec<String> {
        self.fallbacks.candidates(id)
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.wiring.cache
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            cached: self.wiring.cache.len(),
            in_flight: self.wiring.cache.in_flight_count(),
            scheduler: self.wiring.scheduler.snapshot(),
        }
    }

    /// Refuse new subscriptions and stop the scheduler. Queued lookups
    /// settle as cancelled.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.wiring.scheduler.shutdown().await;
        info!("icon pipeline shut down");
    }
}

/// Number of `step` multiples strictly below `threshold`.
fn stagger_slots(step: Duration, threshold: Duration) -> u32 {
    if step.is_zero() {
        return 1;
    }
    let slots = threshold.as_nanos().div_ceil(step.as_nanos());
    u32::try_from(slots).unwrap_or(u32::MAX).max(1)
}
