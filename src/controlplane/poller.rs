//! Work Request Poller
//!
//! Bounded, cancellable wait loop used for work requests and for any
//! eventually-consistent remote condition (lifecycle settling, deletion).
//!
//! Each iteration sleeps one interval, checks cancellation, polls once and
//! returns on a terminal result. Once the elapsed time reaches `max_wait`
//! the loop gives up with [`Error::OperationTimedOut`].

use crate::domain::ports::RemoteClient;
use crate::domain::state::{ResourceId, TerminalStatus, WorkRequestHandle, WorkRequestStatus};
use crate::error::{Error, Result};
use backoff::backoff::{Backoff, Constant};
use backoff::ExponentialBackoffBuilder;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =============================================================================
// Settings
// =============================================================================

/// How the delay between polls evolves
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PollStrategy {
    /// Same interval every time
    Fixed,
    /// Interval grows by `multiplier` up to `max_interval`
    Exponential { multiplier: f64, max_interval: Duration },
}

/// Poll loop settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    /// First (or only) delay between polls
    pub interval: Duration,
    /// Upper bound on the total wait
    pub max_wait: Duration,
    pub strategy: PollStrategy,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_wait: Duration::from_secs(20 * 60),
            strategy: PollStrategy::Fixed,
        }
    }
}

impl PollSettings {
    pub fn fixed(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval,
            max_wait,
            strategy: PollStrategy::Fixed,
        }
    }

    /// Delay generator for one wait; no jitter so poll counts are exact
    fn intervals(&self) -> Box<dyn Backoff + Send> {
        match self.strategy {
            PollStrategy::Fixed => Box::new(Constant::new(self.interval)),
            PollStrategy::Exponential {
                multiplier,
                max_interval,
            } => Box::new(
                ExponentialBackoffBuilder::new()
                    .with_initial_interval(self.interval)
                    .with_randomization_factor(0.0)
                    .with_multiplier(multiplier)
                    .with_max_interval(max_interval)
                    .with_max_elapsed_time(None)
                    .build(),
            ),
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Result of probing a condition once
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Done(T),
    Pending,
}

/// Bounded poll loop bound to one cancellation token
pub struct Poller {
    settings: PollSettings,
    cancel: CancellationToken,
    polls: AtomicU32,
}

impl Poller {
    pub fn new(settings: PollSettings, cancel: CancellationToken) -> Self {
        Self {
            settings,
            cancel,
            polls: AtomicU32::new(0),
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Total polls issued by this poller so far
    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Wait for a work request to reach a terminal status
    pub async fn await_work_request(
        &self,
        remote: &dyn RemoteClient,
        handle: &WorkRequestHandle,
    ) -> Result<TerminalStatus> {
        let operation = format!("work request {}", handle);
        let mut window = self.window(&operation);
        let mut last = WorkRequestStatus::Pending;
        // last identity the remote reported, kept for timeout and cancel
        let mut reported: Option<ResourceId> = None;

        loop {
            window
                .tick()
                .await
                .map_err(|e| e.with_resource_id(reported.clone()))?;

            match remote.get_work_request(handle).await {
                Ok(request) => {
                    if request.resource_id.is_some() {
                        reported = request.resource_id.clone();
                    }
                    if !request.status.can_follow(last) {
                        warn!(
                            work_request = %handle,
                            from = %last,
                            to = %request.status,
                            "Ignoring work request status regression"
                        );
                    } else {
                        last = request.status;
                        debug!(
                            work_request = %handle,
                            status = %request.status,
                            percent = ?request.percent_complete,
                            "Work request polled"
                        );
                        match request.status {
                            WorkRequestStatus::Succeeded => {
                                return Ok(TerminalStatus::Succeeded {
                                    resource_id: request.resource_id,
                                })
                            }
                            WorkRequestStatus::Failed => {
                                return Ok(TerminalStatus::Failed {
                                    reason: request
                                        .failure
                                        .unwrap_or_else(|| "work request failed".to_string()),
                                    resource_id: reported,
                                })
                            }
                            WorkRequestStatus::Pending | WorkRequestStatus::InProgress => {}
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(work_request = %handle, error = %e, "Transient error while polling");
                }
                Err(e) => return Err(e),
            }

            window
                .check_deadline()
                .map_err(|e| e.with_resource_id(reported.clone()))?;
        }
    }

    /// Poll `probe` until it reports [`Probe::Done`]
    pub async fn await_condition<T, F, Fut>(&self, operation: &str, mut probe: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        let mut window = self.window(operation);

        loop {
            window.tick().await?;

            match probe().await {
                Ok(Probe::Done(value)) => return Ok(value),
                Ok(Probe::Pending) => {}
                Err(e) if e.is_transient() => {
                    warn!(operation, error = %e, "Transient error while polling");
                }
                Err(e) => return Err(e),
            }

            window.check_deadline()?;
        }
    }

    fn window<'a>(&'a self, operation: &str) -> PollWindow<'a> {
        PollWindow {
            poller: self,
            operation: operation.to_string(),
            started: Instant::now(),
            intervals: self.settings.intervals(),
            polls: 0,
        }
    }
}

/// State of a single bounded wait
struct PollWindow<'a> {
    poller: &'a Poller,
    operation: String,
    started: Instant,
    intervals: Box<dyn Backoff + Send>,
    polls: u32,
}

impl PollWindow<'_> {
    /// Sleep until the next poll is due, then count it
    async fn tick(&mut self) -> Result<()> {
        let elapsed = self.started.elapsed();
        let remaining = self.poller.settings.max_wait.saturating_sub(elapsed);
        let delay = self
            .intervals
            .next_backoff()
            .unwrap_or(self.poller.settings.interval)
            .min(remaining);

        tokio::select! {
            biased;
            _ = self.poller.cancel.cancelled() => return Err(self.cancelled()),
            _ = tokio::time::sleep(delay) => {}
        }

        if self.poller.cancel.is_cancelled() {
            return Err(self.cancelled());
        }

        self.polls += 1;
        self.poller.polls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn check_deadline(&self) -> Result<()> {
        let waited = self.started.elapsed();
        if waited >= self.poller.settings.max_wait {
            return Err(Error::OperationTimedOut {
                operation: self.operation.clone(),
                waited,
                polls: self.polls,
                resource_id: None,
            });
        }
        Ok(())
    }

    fn cancelled(&self) -> Error {
        debug!(operation = %self.operation, polls = self.polls, "Wait cancelled");
        Error::OperationCancelled {
            operation: self.operation.clone(),
            resource_id: None,
        }
    }
}
