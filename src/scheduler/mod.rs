//! The test controller loop.
//!
//! Each iteration: poll liveness, dispatch the head of the queue if it is
//! due, route the outcome, merge follow-up tests, then rest for a fixed
//! interval and count every queued delay down by the time slept.

mod dispatch;
pub mod queue;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::checks::Outcome;
use crate::daemon::Liveness;
use crate::notify::{Notifier, NotifierHandle};

pub use self::queue::{ScheduledTest, TestBatch, TestQueue};

/// Default rest between loop iterations, in seconds.
pub const DEFAULT_REST_SECS: u64 = 10;

/// Faults that stop the loop. Warnings and failures of individual tests
/// are [`Outcome`]s, not errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("test '{test}' raised an unclassified error: {error:#}")]
    Unclassified { test: String, error: anyhow::Error },

    #[error("test '{test}' panicked: {message}")]
    Panicked { test: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Dispatching,
    Stopped,
}

/// Outcome counters for the lifetime of a scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub success: u64,
    pub warning: u64,
    pub failure: u64,
}

impl RunStats {
    pub fn total(&self) -> u64 {
        self.success + self.warning + self.failure
    }

    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Success => self.success += 1,
            Outcome::Warning { .. } => self.warning += 1,
            Outcome::Failure { .. } => self.failure += 1,
        }
    }
}

#[derive(Debug)]
pub struct Scheduler {
    queue: TestQueue,
    stats: RunStats,
    state: SchedulerState,
    notifier: NotifierHandle,
    /// Whole seconds, so every rest counts delays down by exactly this much.
    rest_secs: u64,
}

impl Scheduler {
    pub fn new(notifier: NotifierHandle) -> Self {
        Self {
            queue: TestQueue::new(),
            stats: RunStats::default(),
            state: SchedulerState::Idle,
            notifier,
            rest_secs: DEFAULT_REST_SECS,
        }
    }

    /// Seconds slept between iterations. Clamped to at least one so queued
    /// delays always make progress.
    pub fn with_rest_interval(mut self, secs: u64) -> Self {
        self.rest_secs = secs.max(1);
        self
    }

    /// Queue one test or a `Vec` of tests.
    pub fn add_tests(&mut self, tests: impl Into<TestBatch>) {
        self.queue.add(tests);
        debug!(queued = self.queue.len(), "tests added");
    }

    /// A handle sharing this scheduler's notifier slot.
    pub fn notifier(&self) -> NotifierHandle {
        self.notifier.clone()
    }

    pub async fn set_notifier(&self, notifier: Arc<dyn Notifier>) {
        self.notifier.set(notifier).await;
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn queue(&self) -> &TestQueue {
        &self.queue
    }

    pub fn rest_interval(&self) -> Duration {
        Duration::from_secs(self.rest_secs)
    }

    /// Run one already-dequeued test: classify, count, notify, and merge
    /// whatever follow-ups it produced.
    pub async fn run_test(&mut self, mut item: ScheduledTest) -> Result<Outcome, SchedulerError> {
        self.state = SchedulerState::Dispatching;
        info!(test = %item.name(), priority = item.priority(), "running test");

        let outcome = match dispatch::execute(&mut item).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.state = SchedulerState::Stopped;
                return Err(e);
            }
        };
        self.stats.record(&outcome);

        match &outcome {
            Outcome::Success => info!(test = %item.name(), "test passed"),
            Outcome::Warning { message } => warn!(test = %item.name(), %message, "test warning"),
            Outcome::Failure { message } => warn!(test = %item.name(), %message, "test failed"),
        }

        if let Err(e) = self.notifier.route(item.name(), &outcome).await {
            error!(test = %item.name(), "Failed to send notification: {:#}", e);
        }

        let follow_ups = item.test_mut().new_tests();
        if !follow_ups.is_empty() {
            debug!(test = %item.name(), count = follow_ups.len(), "queueing follow-up tests");
            self.add_tests(follow_ups);
        }

        self.state = SchedulerState::Idle;
        Ok(outcome)
    }

    /// Dispatch the head of the queue if it is due. Returns the outcome,
    /// or `None` when nothing ran.
    pub async fn step(&mut self) -> Result<Option<Outcome>, SchedulerError> {
        if self.queue.peek_due().is_none() {
            return Ok(None);
        }
        match self.queue.pop() {
            Some(item) => self.run_test(item).await.map(Some),
            None => Ok(None),
        }
    }

    /// Sleep for the rest interval, then count every delay down by it.
    pub async fn rest(&mut self) {
        debug!(secs = self.rest_secs, "test controller sleeping");
        tokio::time::sleep(self.rest_interval()).await;
        self.queue
            .decrement_all(i64::try_from(self.rest_secs).unwrap_or(i64::MAX));
    }

    /// Loop until `host` says stop or a test faults.
    pub async fn run(&mut self, host: &dyn Liveness) -> Result<RunStats, SchedulerError> {
        info!(queued = self.queue.len(), rest_secs = self.rest_secs, "test controller running");
        self.state = SchedulerState::Idle;

        while host.should_keep_running() {
            if let Err(e) = self.step().await {
                error!(
                    error = %e,
                    success = self.stats.success,
                    warning = self.stats.warning,
                    failure = self.stats.failure,
                    "test controller stopped by an unrecoverable error"
                );
                return Err(e);
            }
            self.rest().await;
        }

        self.state = SchedulerState::Stopped;
        info!(
            success = self.stats.success,
            warning = self.stats.warning,
            failure = self.stats.failure,
            "test controller stopped"
        );
        Ok(self.stats)
    }
}
