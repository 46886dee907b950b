//! The per-consumer driver task and the consumer's handle to it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use iconpipe_cache::ResolutionCache;
use iconpipe_core::{CancelToken, ItemId, ResolutionOutcome};
use iconpipe_scheduler::{RequestScheduler, ResolutionRequest};

use crate::state::{Decision, LoadController, LoadState};

/// Consumer feedback delivered to a running controller.
#[derive(Debug)]
pub(crate) enum Command {
    RenderFailed,
    Reschedule(Duration),
}

/// Publish unless a terminal state is already showing.
pub(crate) fn publish(tx: &watch::Sender<LoadState>, state: LoadState) -> bool {
    tx.send_if_modified(|current| {
        if current.is_terminal() || *current == state {
            false
        } else {
            *current = state;
            true
        }
    })
}

/// Consumer handle for one requested identifier.
///
/// Dropping the subscription cancels it.
pub struct Subscription {
    id: ItemId,
    rx: watch::Receiver<LoadState>,
    tx: Arc<watch::Sender<LoadState>>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancelToken,
}

impl Subscription {
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> LoadState {
        self.rx.borrow().clone()
    }

    /// Wait for the next state change and return it.
    pub async fn changed(&mut self) -> LoadState {
        let _ = self.rx.changed().await;
        self.rx.borrow_and_update().clone()
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&LoadState) -> bool) -> LoadState {
        let matched = self
            .rx
            .wait_for(|state| predicate(state))
            .await
            .map(|state| (*state).clone());
        match matched {
            Ok(state) => state,
            Err(_) => self.rx.borrow().clone(),
        }
    }

    /// Wait until there is something final to display.
    pub async fn settled(&mut self) -> LoadState {
        self.wait_for(LoadState::is_settled).await
    }

    /// The current URL could not be displayed.
    pub fn report_render_failure(&self) {
        let _ = self.commands.send(Command::RenderFailed);
    }

    /// Replace a pending or deferred initial delay.
    pub fn reschedule(&self, delay: Duration) {
        let _ = self.commands.send(Command::Reschedule(delay));
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        if publish(&self.tx, LoadState::Cancelled) {
            debug!(id = %self.id, "subscription cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Everything a controller task needs from the pipeline.
#[derive(Clone)]
pub(crate) struct Wiring {
    pub(crate) cache: ResolutionCache,
    pub(crate) scheduler: Arc<RequestScheduler>,
    pub(crate) defer_threshold: Duration,
}

pub(crate) struct ControllerTask {
    controller: LoadController,
    priority: bool,
    wiring: Wiring,
    tx: Arc<watch::Sender<LoadState>>,
    commands: mpsc::UnboundedReceiver<Command>,
    cancel: CancelToken,
}

/// Build a controller task and its subscription. The caller spawns `run`.
pub(crate) fn spawn_pair(
    controller: LoadController,
    priority: bool,
    wiring: Wiring,
) -> (ControllerTask, Subscription) {
    let id = controller.id();
    let (tx, rx) = watch::channel(LoadState::Idle);
    let tx = Arc::new(tx);
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let cancel = CancelToken::new();

    let task = ControllerTask {
        controller,
        priority,
        wiring,
        tx: Arc::clone(&tx),
        commands: commands_rx,
        cancel: cancel.clone(),
    };
    let subscription = Subscription {
        id,
        rx,
        tx,
        commands: commands_tx,
        cancel,
    };
    (task, subscription)
}

/// Why a controller stopped before settling.
struct Stopped;

impl ControllerTask {
    pub(crate) async fn run(mut self, initial_delay: Duration) {
        let id = self.controller.id();
        if self.drive(initial_delay).await.is_err() {
            let state = self.controller.cancel();
            publish(&self.tx, state);
            debug!(%id, "load controller stopped");
        }
    }

    async fn drive(&mut self, initial_delay: Duration) -> Result<(), Stopped> {
        self.wait_initial_delay(initial_delay).await?;

        let mut decision = self.resolve().await?;
        loop {
            match decision {
                Decision::RetryAfter { attempt, delay } => {
                    debug!(
                        id = %self.controller.id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "retrying resolution"
                    );
                    self.publish(self.controller.state().clone());
                    self.sleep(delay).await?;
                    decision = self.resolve().await?;
                }
                Decision::Settled(state) => {
                    self.publish(state.clone());
                    if state.is_terminal() {
                        warn!(id = %self.controller.id(), "icon load failed");
                        return Ok(());
                    }
                    decision = self.await_render_failure().await?;
                }
            }
        }
    }

    /// `Idle` or `Scheduled` until the delay elapses.
    async fn wait_initial_delay(&mut self, mut delay: Duration) -> Result<(), Stopped> {
        loop {
            if delay >= self.wiring.defer_threshold {
                let state = self.controller.idle();
                self.publish(state);
                debug!(id = %self.controller.id(), delay_ms = delay.as_millis() as u64, "load deferred");
                delay = self.next_reschedule(None).await?;
                continue;
            }

            let state = self.controller.schedule(delay);
            self.publish(state);
            match self.next_reschedule(Some(delay)).await {
                Ok(new_delay) => delay = new_delay,
                Err(Stopped) if self.cancel.is_cancelled() => return Err(Stopped),
                // Timer elapsed.
                Err(Stopped) => return Ok(()),
            }
        }
    }

    /// Wait for a `Reschedule` command. With `timer`, an elapsed timer
    /// ends the wait with `Err(Stopped)` while the token stays live.
    async fn next_reschedule(&mut self, timer: Option<Duration>) -> Result<Duration, Stopped> {
        // A delay too large to represent never elapses.
        let deadline = timer.and_then(|d| tokio::time::Instant::now().checked_add(d));
        loop {
            let sleep = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Stopped),
                _ = sleep => return Err(Stopped),
                command = self.commands.recv() => match command {
                    Some(Command::Reschedule(delay)) => return Ok(delay),
                    Some(Command::RenderFailed) => continue,
                    None => {
                        self.cancel.cancel();
                        return Err(Stopped);
                    }
                },
            }
        }
    }

    /// One pass through cache, dedup and scheduler.
    async fn resolve(&mut self) -> Result<Decision, Stopped> {
        let state = self.controller.begin();
        self.publish(state);
        let outcome = self.lookup().await?;
        Ok(self.controller.on_outcome(&outcome))
    }

    async fn lookup(&self) -> Result<ResolutionOutcome, Stopped> {
        let id = self.controller.id();
        if self.cancel.is_cancelled() {
            return Err(Stopped);
        }
        if let Some(entry) = self.wiring.cache.lookup(id) {
            debug!(%id, "cache hit");
            return Ok(entry.into_outcome());
        }

        let scheduler = Arc::clone(&self.wiring.scheduler);
        let priority = self.priority;
        let handle = self.wiring.cache.get_or_create_in_flight(id, move |token| async move {
            scheduler
                .submit(ResolutionRequest::new(id, priority, token))
                .await
        });
        // A priority joiner moves queued background work to the fast lane.
        if self.priority && self.wiring.scheduler.promote(id) {
            debug!(%id, "priority consumer promoted shared lookup");
        }
        let outcome = handle.wait(&self.cancel).await;
        if self.cancel.is_cancelled() {
            return Err(Stopped);
        }
        debug!(%id, outcome = outcome.label(), "resolution finished");
        Ok(outcome)
    }

    async fn await_render_failure(&mut self) -> Result<Decision, Stopped> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(Stopped),
                command = self.commands.recv() => match command {
                    Some(Command::RenderFailed) => {
                        if let Some(decision) = self.controller.on_render_failure() {
                            debug!(id = %self.controller.id(), "render failure reported");
                            return Ok(decision);
                        }
                    }
                    Some(Command::Reschedule(_)) => {}
                    None => return Err(Stopped),
                },
            }
        }
    }

    async fn sleep(&self, delay: Duration) -> Result<(), Stopped> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stopped),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    fn publish(&self, state: LoadState) {
        publish(&self.tx, state);
    }
}
