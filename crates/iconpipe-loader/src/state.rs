//! Load states and the transition table that drives them.
//!
//! `LoadController` is synchronous: it takes outcomes and render feedback
//! and says what to do next. Timers and I/O live in the driver task.

use std::time::Duration;

use serde::Serialize;

use iconpipe_core::{ItemId, LoaderConfig, ResolutionOutcome};

use crate::error::LoadResult;

/// What a consumer currently shows for one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LoadState {
    /// Not scheduled; waiting for a shorter delay.
    Idle,
    Scheduled { delay: Duration },
    Resolving { attempt: u32 },
    Success { url: String },
    Fallback { url: String, index: usize },
    Failed,
    Cancelled,
}

impl LoadState {
    /// No further transitions happen from a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadState::Failed | LoadState::Cancelled)
    }

    /// Whether the consumer has something final to display.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            LoadState::Success { .. }
                | LoadState::Fallback { .. }
                | LoadState::Failed
                | LoadState::Cancelled
        )
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            LoadState::Success { url } | LoadState::Fallback { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// Transient retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Retry `n` waits `(n + 1) * retry_delay`.
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &LoaderConfig) -> LoadResult<Self> {
        Ok(Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay()?,
        })
    }

    /// Delay before retrying after attempt `attempt` failed.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.retry_delay * (attempt + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// What the driver should do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Publish the state and wait for consumer feedback.
    Settled(LoadState),
    /// Resolve again, through the cache, after `delay`.
    RetryAfter { attempt: u32, delay: Duration },
}

/// Per-consumer transition table.
#[derive(Debug, Clone)]
pub struct LoadController {
    id: ItemId,
    candidates: Vec<String>,
    policy: RetryPolicy,
    state: LoadState,
    attempt: u32,
}

impl LoadController {
    pub fn new(id: ItemId, candidates: Vec<String>, policy: RetryPolicy) -> Self {
        Self {
            id,
            candidates,
            policy,
            state: LoadState::Idle,
            attempt: 0,
        }
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn schedule(&mut self, delay: Duration) -> LoadState {
        self.state = LoadState::Scheduled { delay };
        self.state.clone()
    }

    pub fn idle(&mut self) -> LoadState {
        self.state = LoadState::Idle;
        self.state.clone()
    }

    /// Enter `Resolving` for the current attempt.
    pub fn begin(&mut self) -> LoadState {
        self.state = LoadState::Resolving {
            attempt: self.attempt,
        };
        self.state.clone()
    }

    pub fn cancel(&mut self) -> LoadState {
        self.state = LoadState::Cancelled;
        self.state.clone()
    }

    /// Apply the outcome of one resolution.
    pub fn on_outcome(&mut self, outcome: &ResolutionOutcome) -> Decision {
        match outcome {
            ResolutionOutcome::Found(url) => self.settle(LoadState::Success { url: url.clone() }),
            ResolutionOutcome::NotFound => self.first_fallback_or_failed(),
            ResolutionOutcome::Transient(_)
            | ResolutionOutcome::QuotaExceeded
            | ResolutionOutcome::Cancelled => self.retry_or(Self::first_fallback_or_failed),
        }
    }

    /// The consumer could not display the current URL.
    ///
    /// Returns `None` when nothing is on display.
    pub fn on_render_failure(&mut self) -> Option<Decision> {
        let next_index = match &self.state {
            LoadState::Success { .. } => 0,
            LoadState::Fallback { index, .. } => index + 1,
            _ => return None,
        };
        let decision = match self.candidates.get(next_index) {
            Some(url) => self.settle(LoadState::Fallback {
                url: url.clone(),
                index: next_index,
            }),
            None => self.retry_or(|controller: &mut Self| controller.settle(LoadState::Failed)),
        };
        Some(decision)
    }

    fn retry_or(&mut self, exhausted: fn(&mut Self) -> Decision) -> Decision {
        if self.attempt < self.policy.max_retries {
            let delay = self.policy.delay_after(self.attempt);
            self.attempt += 1;
            self.state = LoadState::Resolving {
                attempt: self.attempt,
            };
            Decision::RetryAfter {
                attempt: self.attempt,
                delay,
            }
        } else {
            exhausted(self)
        }
    }

    fn first_fallback_or_failed(&mut self) -> Decision {
        match self.candidates.first() {
            Some(url) => self.settle(LoadState::Fallback {
                url: url.clone(),
                index: 0,
            }),
            None => self.settle(LoadState::Failed),
        }
    }

    fn settle(&mut self, state: LoadState) -> Decision {
        self.state = state.clone();
        Decision::Settled(state)
    }
}
