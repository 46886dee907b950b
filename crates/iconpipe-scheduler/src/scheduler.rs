//! The admission loop and its shared state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use iconpipe_client::IconSource;
use iconpipe_core::{CancelToken, ItemId, ResolutionOutcome, SchedulerConfig};

use crate::error::{SchedulerError, SchedulerResult};
use crate::window::SlidingWindow;

/// One logical lookup handed to the scheduler.
#[derive(Debug, Clone)]
pub struct ResolutionRequest {
    pub id: ItemId,
    /// Admitted through the concurrent fast lane.
    pub priority: bool,
    pub cancel: CancelToken,
    /// Quota retries so far.
    pub attempt: u32,
}

impl ResolutionRequest {
    pub fn new(id: ItemId, priority: bool, cancel: CancelToken) -> Self {
        Self {
            id,
            priority,
            cancel,
            attempt: 0,
        }
    }

    pub fn background(id: ItemId, cancel: CancelToken) -> Self {
        Self::new(id, false, cancel)
    }

    pub fn priority(id: ItemId, cancel: CancelToken) -> Self {
        Self::new(id, true, cancel)
    }

    fn lane(&self) -> Lane {
        if self.priority {
            Lane::Priority
        } else {
            Lane::Background
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Priority,
    Background,
}

struct QueueEntry {
    request: ResolutionRequest,
    enqueued_at: Instant,
    respond: oneshot::Sender<ResolutionOutcome>,
}

impl QueueEntry {
    /// Deliver the outcome. A cancelled submitter always sees `Cancelled`.
    fn settle(self, outcome: ResolutionOutcome) {
        let outcome = if self.request.cancel.is_cancelled() {
            ResolutionOutcome::Cancelled
        } else {
            outcome
        };
        let _ = self.respond.send(outcome);
    }
}

/// Parsed, validated scheduler parameters.
#[derive(Debug, Clone)]
struct Limits {
    quota: usize,
    window: Duration,
    min_interval: Duration,
    priority_concurrency: usize,
    priority_stagger: Duration,
    initial_backoff: Duration,
    max_backoff: Duration,
    max_quota_retries: u32,
}

impl Limits {
    fn from_config(config: &SchedulerConfig) -> SchedulerResult<Self> {
        let initial_backoff = config.initial_backoff()?;
        Ok(Self {
            quota: config.quota() as usize,
            window: config.window()?,
            min_interval: config.min_interval()?,
            priority_concurrency: config.priority_concurrency.max(1),
            priority_stagger: config.priority_stagger()?,
            initial_backoff,
            max_backoff: config.max_backoff()?.max(initial_backoff),
            max_quota_retries: config.max_quota_retries,
        })
    }
}

struct SchedulerState {
    priority: VecDeque<QueueEntry>,
    background: VecDeque<QueueEntry>,
    window: SlidingWindow,
    active_priority: usize,
    last_priority_admission: Option<Instant>,
    last_background_admission: Option<Instant>,
    paused_until: Option<Instant>,
    backoff: Duration,
    admitted: u64,
    quota_events: u64,
    cancelled: u64,
    shut_down: bool,
}

enum Step {
    Admit(QueueEntry, Lane),
    /// Nothing admissible now. Sleep until the instant, or until woken.
    Wait(Option<Instant>),
}

impl SchedulerState {
    fn new(limits: &Limits) -> Self {
        Self {
            priority: VecDeque::new(),
            background: VecDeque::new(),
            window: SlidingWindow::new(limits.window),
            active_priority: 0,
            last_priority_admission: None,
            last_background_admission: None,
            paused_until: None,
            backoff: limits.initial_backoff,
            admitted: 0,
            quota_events: 0,
            cancelled: 0,
            shut_down: false,
        }
    }

    fn queue_mut(&mut self, lane: Lane) -> &mut VecDeque<QueueEntry> {
        match lane {
            Lane::Priority => &mut self.priority,
            Lane::Background => &mut self.background,
        }
    }

    /// Settle every queued entry whose submitter gave up.
    fn discard_cancelled(&mut self) {
        let mut dropped = 0;
        for queue in [&mut self.priority, &mut self.background] {
            if !queue.iter().any(|e| e.request.cancel.is_cancelled()) {
                continue;
            }
            let mut kept = VecDeque::with_capacity(queue.len());
            for entry in queue.drain(..) {
                if entry.request.cancel.is_cancelled() {
                    debug!(id = %entry.request.id, "dropping cancelled request before admission");
                    entry.settle(ResolutionOutcome::Cancelled);
                    dropped += 1;
                } else {
                    kept.push_back(entry);
                }
            }
            *queue = kept;
        }
        self.cancelled += dropped;
    }

    fn next_step(&mut self, now: Instant, limits: &Limits) -> Step {
        self.discard_cancelled();

        if let Some(until) = self.paused_until {
            if until > now {
                return Step::Wait(Some(until));
            }
            debug!("quota pause elapsed, resuming admission");
            self.paused_until = None;
        }
        self.window.prune(now);

        let mut wake: Option<Instant> = None;

        if self.active_priority < limits.priority_concurrency && !self.priority.is_empty() {
            let ready_at = self
                .last_priority_admission
                .map(|at| at + limits.priority_stagger);
            match ready_at {
                Some(at) if at > now => wake = Some(at),
                _ => {
                    if let Some(entry) = self.priority.pop_front() {
                        self.active_priority += 1;
                        self.last_priority_admission = Some(now);
                        self.admit(now);
                        return Step::Admit(entry, Lane::Priority);
                    }
                }
            }
        }

        if !self.background.is_empty() {
            let paced = self
                .last_background_admission
                .map(|at| at + limits.min_interval);
            let slot = self.window.next_slot(limits.quota);
            match paced.into_iter().chain(slot).max() {
                Some(at) if at > now => {
                    wake = Some(wake.map_or(at, |w| w.min(at)));
                }
                _ => {
                    if let Some(entry) = self.background.pop_front() {
                        self.last_background_admission = Some(now);
                        self.admit(now);
                        return Step::Admit(entry, Lane::Background);
                    }
                }
            }
        }

        Step::Wait(wake)
    }

    fn admit(&mut self, now: Instant) {
        self.window.record(now);
        self.admitted += 1;
    }

    fn on_complete(
        &mut self,
        mut entry: QueueEntry,
        lane: Lane,
        outcome: ResolutionOutcome,
        now: Instant,
        limits: &Limits,
    ) {
        if lane == Lane::Priority {
            self.active_priority = self.active_priority.saturating_sub(1);
        }

        if outcome != ResolutionOutcome::QuotaExceeded {
            self.backoff = limits.initial_backoff;
            entry.settle(outcome);
            return;
        }

        self.quota_events += 1;
        self.window.clear();
        let pause = self.backoff;
        self.paused_until = Some(now + pause);
        self.backoff = (self.backoff * 2).min(limits.max_backoff);

        let id = entry.request.id;
        let attempt = entry.request.attempt;
        if attempt >= limits.max_quota_retries {
            warn!(%id, attempt, "quota retries exhausted");
            entry.settle(ResolutionOutcome::QuotaExceeded);
        } else if self.shut_down || entry.request.cancel.is_cancelled() {
            entry.settle(ResolutionOutcome::QuotaExceeded);
        } else {
            warn!(
                %id,
                attempt,
                backoff_ms = pause.as_millis() as u64,
                "quota exceeded, pausing admission"
            );
            entry.request.attempt += 1;
            self.queue_mut(lane).push_front(entry);
        }
    }

    /// Move a queued background entry for `id` to the back of the
    /// priority lane.
    fn promote(&mut self, id: ItemId) -> bool {
        let Some(position) = self
            .background
            .iter()
            .position(|e| e.request.id == id && !e.request.cancel.is_cancelled())
        else {
            return false;
        };
        let Some(mut entry) = self.background.remove(position) else {
            return false;
        };
        entry.request.priority = true;
        debug!(%id, skipped = position, "promoting queued request to the priority lane");
        self.priority.push_back(entry);
        true
    }

    fn drain(&mut self) {
        for entry in self.priority.drain(..).chain(self.background.drain(..)) {
            entry.settle(ResolutionOutcome::Cancelled);
        }
    }
}

/// Point-in-time view of a scheduler, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerSnapshot {
    pub priority_queued: usize,
    pub background_queued: usize,
    /// Admissions within the current window.
    pub window_occupancy: usize,
    pub active_priority: usize,
    /// Remaining quota pause, if admission is paused.
    pub paused_for_ms: Option<u64>,
    /// Pause applied to the next quota rejection.
    pub backoff_ms: u64,
    pub admitted: u64,
    pub quota_events: u64,
    pub cancelled: u64,
    pub shut_down: bool,
}

struct Shared {
    state: Mutex<SchedulerState>,
    wake: Notify,
    source: Arc<dyn IconSource>,
    limits: Limits,
}

/// Process-wide gate in front of the remote icon service.
pub struct RequestScheduler {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RequestScheduler {
    /// Spawn the admission loop on the current tokio runtime.
    pub fn start(source: Arc<dyn IconSource>, config: &SchedulerConfig) -> SchedulerResult<Self> {
        let limits = Limits::from_config(config)?;
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;

        info!(
            quota = limits.quota,
            window_ms = limits.window.as_millis() as u64,
            priority_concurrency = limits.priority_concurrency,
            "request scheduler started"
        );

        let shared = Arc::new(Shared {
            state: Mutex::new(SchedulerState::new(&limits)),
            wake: Notify::new(),
            source,
            limits,
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = runtime.spawn(admission_loop(Arc::clone(&shared), shutdown_rx));

        Ok(Self {
            shared,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queue a request and wait for its outcome.
    ///
    /// Returns `Cancelled` as soon as the request's token fires, whether
    /// it is still queued or already executing.
    pub async fn submit(&self, request: ResolutionRequest) -> ResolutionOutcome {
        if request.cancel.is_cancelled() {
            return ResolutionOutcome::Cancelled;
        }
        let cancel = request.cancel.clone();
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock().expect("scheduler lock");
            if state.shut_down {
                return ResolutionOutcome::Transient("scheduler shut down".into());
            }
            let id = request.id;
            let lane = request.lane();
            let queue = state.queue_mut(lane);
            queue.push_back(QueueEntry {
                request,
                enqueued_at: Instant::now(),
                respond: tx,
            });
            debug!(%id, priority = lane == Lane::Priority, queued = queue.len(), "request queued");
        }
        self.shared.wake.notify_one();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.shared.wake.notify_one();
                ResolutionOutcome::Cancelled
            }
            settled = rx => settled
                .unwrap_or_else(|_| ResolutionOutcome::Transient("request dropped by scheduler".into())),
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        let now = Instant::now();
        let mut state = self.shared.state.lock().expect("scheduler lock");
        state.window.prune(now);
        SchedulerSnapshot {
            priority_queued: state.priority.len(),
            background_queued: state.background.len(),
            window_occupancy: state.window.len(),
            active_priority: state.active_priority,
            paused_for_ms: state
                .paused_until
                .filter(|until| *until > now)
                .map(|until| (until - now).as_millis() as u64),
            backoff_ms: state.backoff.as_millis() as u64,
            admitted: state.admitted,
            quota_events: state.quota_events,
            cancelled: state.cancelled,
            shut_down: state.shut_down,
        }
    }

    /// Move a queued background request for `id` into the priority lane.
    /// Returns `false` when no such request is waiting.
    pub fn promote(&self, id: ItemId) -> bool {
        let promoted = self
            .shared
            .state
            .lock()
            .expect("scheduler lock")
            .promote(id);
        if promoted {
            self.shared.wake.notify_one();
        }
        promoted
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().expect("scheduler lock").shut_down
    }

    /// Stop admitting. Queued requests settle as `Cancelled`; requests
    /// already executing finish normally.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().expect("scheduler lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Drop for RequestScheduler {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn admission_loop(shared: Arc<Shared>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let step = {
            let mut state = shared.state.lock().expect("scheduler lock");
            state.next_step(Instant::now(), &shared.limits)
        };

        match step {
            Step::Admit(entry, lane) => {
                debug!(
                    id = %entry.request.id,
                    priority = lane == Lane::Priority,
                    attempt = entry.request.attempt,
                    waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                    "request admitted"
                );
                tokio::spawn(execute(Arc::clone(&shared), entry, lane));
            }
            Step::Wait(deadline) => {
                let pacing = async {
                    match deadline {
                        Some(at) => tokio::time::sleep_until(at).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = pacing => {}
                    _ = shared.wake.notified() => {}
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    let mut state = shared.state.lock().expect("scheduler lock");
    state.shut_down = true;
    state.drain();
    info!("request scheduler stopped");
}

async fn execute(shared: Arc<Shared>, entry: QueueEntry, lane: Lane) {
    let id = entry.request.id;
    let outcome = shared.source.resolve(id, entry.request.cancel.clone()).await;
    {
        let mut state = shared.state.lock().expect("scheduler lock");
        state.on_complete(entry, lane, outcome, Instant::now(), &shared.limits);
    }
    shared.wake.notify_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use iconpipe_client::testing::ScriptedSource;

    fn id(raw: u32) -> ItemId {
        ItemId::new(raw).unwrap()
    }

    fn start(source: &Arc<ScriptedSource>) -> Arc<RequestScheduler> {
        let source: Arc<dyn IconSource> = source.clone();
        Arc::new(RequestScheduler::start(source, &SchedulerConfig::default()).unwrap())
    }

    fn call_instants(source: &ScriptedSource) -> Vec<Instant> {
        let mut instants: Vec<Instant> = source.calls().into_iter().map(|(_, at)| at).collect();
        instants.sort();
        instants
    }

    #[tokio::test(start_paused = true)]
    async fn background_admissions_respect_the_window() {
        let source = Arc::new(ScriptedSource::new());
        let scheduler = start(&source);

        let mut tasks = Vec::new();
        for raw in 1..=25 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(raw), CancelToken::new()))
                    .await
            }));
        }
        for task in tasks {
            assert!(matches!(task.await.unwrap(), ResolutionOutcome::Found(_)));
        }

        let order: Vec<u32> = source.calls().iter().map(|(id, _)| id.get()).collect();
        assert_eq!(order, (1..=25).collect::<Vec<_>>());

        let instants = call_instants(&source);
        assert_eq!(instants.len(), 25);
        // Any 20 consecutive admissions span at least one window.
        for run in instants.windows(20) {
            assert!(run[19] - run[0] >= Duration::from_secs(1));
        }
        for later in &instants[19..] {
            assert!(*later - instants[0] >= Duration::from_secs(1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn background_spacing_is_paced() {
        let source = Arc::new(ScriptedSource::new());
        let scheduler = start(&source);

        let mut tasks = Vec::new();
        for raw in 1..=5 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(raw), CancelToken::new()))
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let min_interval = SchedulerConfig::default().min_interval().unwrap();
        for pair in call_instants(&source).windows(2) {
            assert!(pair[1] - pair[0] >= min_interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn priority_lane_is_bounded_and_concurrent() {
        let source = Arc::new(ScriptedSource::new().with_latency(Duration::from_secs(1)));
        let scheduler = start(&source);

        let mut tasks = Vec::new();
        for raw in 1..=6 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::priority(id(raw), CancelToken::new()))
                    .await
            }));
        }
        for task in tasks {
            assert!(matches!(task.await.unwrap(), ResolutionOutcome::Found(_)));
        }

        assert_eq!(source.peak_concurrency(), 5);
        let instants = call_instants(&source);
        for at in &instants[..5] {
            assert!(*at - instants[0] <= Duration::from_millis(25));
        }
        assert!(instants[5] - instants[0] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn priority_is_not_held_behind_background_pacing() {
        let source = Arc::new(ScriptedSource::new());
        let scheduler = start(&source);

        for raw in 1..=30 {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(raw), CancelToken::new()))
                    .await
            });
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(scheduler.snapshot().background_queued > 20);

        let submitted = Instant::now();
        let outcome = scheduler
            .submit(ResolutionRequest::priority(id(100), CancelToken::new()))
            .await;
        assert!(matches!(outcome, ResolutionOutcome::Found(_)));

        let (_, called) = source
            .calls()
            .into_iter()
            .find(|(called, _)| *called == id(100))
            .unwrap();
        assert!(called - submitted <= Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_rejection_pauses_then_retries() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            id(500),
            [
                ResolutionOutcome::QuotaExceeded,
                ResolutionOutcome::Found("https://cdn/500.png".into()),
            ],
        );
        let scheduler = start(&source);

        let outcome = scheduler
            .submit(ResolutionRequest::background(id(500), CancelToken::new()))
            .await;
        assert_eq!(outcome, ResolutionOutcome::Found("https://cdn/500.png".into()));

        let instants = call_instants(&source);
        assert_eq!(instants.len(), 2);
        assert!(instants[1] - instants[0] >= Duration::from_secs(2));

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.quota_events, 1);
        // Success resets the backoff.
        assert_eq!(snapshot.backoff_ms, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_rejection_clears_the_window() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            id(1),
            [
                ResolutionOutcome::QuotaExceeded,
                ResolutionOutcome::Found("https://cdn/1.png".into()),
            ],
        );
        let scheduler = start(&source);

        let pending = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(1), CancelToken::new()))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.window_occupancy, 0);
        assert_eq!(snapshot.quota_events, 1);
        assert_eq!(snapshot.background_queued, 1);
        assert!(snapshot.paused_for_ms.is_some_and(|ms| ms > 1800 && ms <= 2000));
        assert_eq!(snapshot.backoff_ms, 4000);

        assert!(matches!(pending.await.unwrap(), ResolutionOutcome::Found(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_rejected_request_retries_ahead_of_newer_work() {
        let source = Arc::new(ScriptedSource::new());
        source.script(
            id(1),
            [
                ResolutionOutcome::QuotaExceeded,
                ResolutionOutcome::Found("https://cdn/1.png".into()),
            ],
        );
        let scheduler = start(&source);

        let mut tasks = Vec::new();
        for raw in 1..=4 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(raw), CancelToken::new()))
                    .await
            }));
            // Keep submission order deterministic.
            tokio::task::yield_now().await;
        }
        for task in tasks {
            assert!(matches!(task.await.unwrap(), ResolutionOutcome::Found(_)));
        }

        let order: Vec<u32> = source.calls().iter().map(|(id, _)| id.get()).collect();
        assert_eq!(order, vec![1, 1, 2, 3, 4]);
        assert_eq!(scheduler.snapshot().quota_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn promoted_background_request_skips_the_queue() {
        let source = Arc::new(ScriptedSource::new());
        let scheduler = start(&source);

        let mut tasks = Vec::new();
        for raw in 1..=30 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(raw), CancelToken::new()))
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!scheduler.promote(id(999)));

        let promoted_at = Instant::now();
        assert!(scheduler.promote(id(30)));
        assert!(!scheduler.promote(id(30)));
        let last = tasks.pop().unwrap();
        assert!(matches!(last.await.unwrap(), ResolutionOutcome::Found(_)));

        let (_, called) = source
            .calls()
            .into_iter()
            .find(|(called, _)| *called == id(30))
            .unwrap();
        assert!(called - promoted_at <= Duration::from_millis(10));
        assert_eq!(source.calls_for(id(30)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_quota_rejections_double_the_pause() {
        let source = Arc::new(ScriptedSource::new().with_default(ResolutionOutcome::QuotaExceeded));
        let scheduler = start(&source);

        let outcome = scheduler
            .submit(ResolutionRequest::background(id(9), CancelToken::new()))
            .await;
        assert_eq!(outcome, ResolutionOutcome::QuotaExceeded);

        let instants = call_instants(&source);
        assert_eq!(instants.len(), 6);
        let expected = [2, 4, 8, 10, 10];
        for (pair, secs) in instants.windows(2).zip(expected) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_secs(secs), "gap {gap:?} below {secs}s");
            assert!(gap < Duration::from_secs(secs + 1), "gap {gap:?} above {secs}s");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_admission_makes_no_call() {
        let source = Arc::new(ScriptedSource::new());
        let scheduler = start(&source);

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = scheduler
            .submit(ResolutionRequest::background(id(1), cancel))
            .await;
        assert_eq!(outcome, ResolutionOutcome::Cancelled);
        assert_eq!(source.call_count(), 0);

        scheduler
            .submit(ResolutionRequest::background(id(2), CancelToken::new()))
            .await;

        // The next background slot is ~52ms out; cancel while queued.
        let cancel = CancelToken::new();
        let queued = {
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(3), cancel))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        assert_eq!(queued.await.unwrap(), ResolutionOutcome::Cancelled);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.calls_for(id(3)), 0);
        assert_eq!(scheduler.snapshot().cancelled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_execution_returns_cancelled() {
        let source = Arc::new(ScriptedSource::new().with_latency(Duration::from_secs(3)));
        let scheduler = start(&source);

        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let outcome = scheduler
            .submit(ResolutionRequest::priority(id(4), cancel))
            .await;
        assert_eq!(outcome, ResolutionOutcome::Cancelled);
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_queued_and_rejects_new_work() {
        let source = Arc::new(ScriptedSource::new());
        let scheduler = start(&source);

        let mut tasks = Vec::new();
        for raw in 1..=5 {
            let scheduler = scheduler.clone();
            tasks.push(tokio::spawn(async move {
                scheduler
                    .submit(ResolutionRequest::background(id(raw), CancelToken::new()))
                    .await
            }));
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
        scheduler.shutdown().await;

        let mut found = 0;
        let mut cancelled = 0;
        for task in tasks {
            match task.await.unwrap() {
                ResolutionOutcome::Found(_) => found += 1,
                ResolutionOutcome::Cancelled => cancelled += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!((found, cancelled), (1, 4));

        let late = scheduler
            .submit(ResolutionRequest::background(id(6), CancelToken::new()))
            .await;
        assert!(matches!(late, ResolutionOutcome::Transient(_)));
        assert!(scheduler.is_shut_down());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_serializes() {
        let source = Arc::new(ScriptedSource::new());
        let scheduler = start(&source);
        let json = serde_json::to_value(scheduler.snapshot()).unwrap();
        assert_eq!(json["backoff_ms"], 2000);
        assert_eq!(json["paused_for_ms"], serde_json::Value::Null);
    }
}
