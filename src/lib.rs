//! testwarden -- a long-running test controller.
//!
//! Tests sit in a priority-ordered queue with countdown delays. The
//! scheduler runs the head once it is due, counts and notifies the
//! outcome, queues any follow-up tests the run produced, and rests for a
//! fixed interval before looking again.

pub mod checks;
pub mod config;
pub mod daemon;
pub mod notify;
pub mod scheduler;

use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::notify::{LogFileNotifier, NotifierHandle};
use crate::scheduler::Scheduler;

/// Build a scheduler from configuration: notifier, rest interval and the
/// configured checks.
pub async fn build_scheduler(config: &Config) -> Result<Scheduler> {
    let mut scheduler = Scheduler::new(NotifierHandle::default())
        .with_rest_interval(config.daemon.rest_interval_secs);

    if let Some(path) = &config.notify.log_file {
        tracing::info!(path = %path.display(), "notifications go to log file");
        let log = LogFileNotifier::open(path, config.notify.format).await?;
        scheduler.set_notifier(Arc::new(log)).await;
    }

    scheduler.add_tests(checks::build_all(&config.checks)?);
    Ok(scheduler)
}
