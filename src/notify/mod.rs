//! Outcome notification sinks.
//!
//! The scheduler routes warnings and failures to whatever [`Notifier`] the
//! shared [`NotifierHandle`] currently holds. Successes are counted but not
//! notified.

pub mod console;
pub mod logfile;

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::checks::Outcome;

pub use console::ConsoleNotifier;
pub use logfile::LogFileNotifier;

/// Trait for all notification sinks.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync + fmt::Debug {
    async fn notify_success(&self, message: &str) -> Result<()>;
    async fn notify_warning(&self, message: &str) -> Result<()>;
    async fn notify_failure(&self, message: &str) -> Result<()>;
}

/// Which notifier method a message went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyLevel {
    Success,
    Warning,
    Failure,
}

/// Render the notification line for one outcome.
pub fn format_message(test_name: &str, outcome: &Outcome) -> String {
    match outcome {
        Outcome::Success => format!("PASS: {}", test_name),
        Outcome::Warning { message } => format!("WARNING: {}: {}", test_name, message),
        Outcome::Failure { message } => format!("FAILURE: {}: {}", test_name, message),
    }
}

/// Shared, swappable reference to the active notifier.
///
/// Clones share the same slot, so a sink installed through one clone is
/// seen by the scheduler on its next routing call.
#[derive(Clone)]
pub struct NotifierHandle {
    inner: Arc<RwLock<Arc<dyn Notifier>>>,
}

impl NotifierHandle {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(notifier)),
        }
    }

    /// Replace the active notifier.
    pub async fn set(&self, notifier: Arc<dyn Notifier>) {
        *self.inner.write().await = notifier;
        tracing::debug!("notifier swapped");
    }

    /// Snapshot of the active notifier. The lock is released on return.
    pub async fn current(&self) -> Arc<dyn Notifier> {
        self.inner.read().await.clone()
    }

    /// Send one outcome to the active notifier. Successes are not routed.
    pub async fn route(&self, test_name: &str, outcome: &Outcome) -> Result<()> {
        let message = format_message(test_name, outcome);
        let sink = self.current().await;
        match outcome {
            Outcome::Success => Ok(()),
            Outcome::Warning { .. } => sink.notify_warning(&message).await,
            Outcome::Failure { .. } => sink.notify_failure(&message).await,
        }
    }
}

impl Default for NotifierHandle {
    fn default() -> Self {
        Self::new(Arc::new(ConsoleNotifier))
    }
}

impl fmt::Debug for NotifierHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierHandle").finish_non_exhaustive()
    }
}
