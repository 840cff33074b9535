//! Schedulable tests and the built-in check kinds.
//!
//! A [`Test`] is the payload carried by a [`ScheduledTest`]. Running it
//! yields an [`Outcome`]; an `Err` from [`Test::run`] is not a per-test
//! result but a fault that stops the scheduler.

pub mod command;
pub mod http;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::scheduler::ScheduledTest;

/// Classification of one execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Non-fatal anomaly for this test only.
    Warning { message: String },
    /// This test failed; the scheduler keeps going.
    Failure { message: String },
}

impl Outcome {
    pub fn warning(message: impl Into<String>) -> Self {
        Outcome::Warning {
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Outcome::Failure {
            message: message.into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Warning { .. } => "warning",
            Outcome::Failure { .. } => "failure",
        }
    }
}

/// Trait for everything the scheduler can run.
#[async_trait::async_trait]
pub trait Test: Send + fmt::Debug {
    /// Human-readable name used in logs and notifications.
    fn name(&self) -> &str;

    /// Run the test once.
    async fn run(&mut self) -> Result<Outcome>;

    /// Follow-up tests produced by the last run. Called once after every
    /// classified run, whatever the outcome.
    fn new_tests(&mut self) -> Vec<ScheduledTest> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Command,
    Http,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Command => write!(f, "command"),
            CheckKind::Http => write!(f, "http"),
        }
    }
}

/// A check as declared in the `[[checks]]` table of the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckSpec {
    pub name: String,
    pub kind: CheckKind,
    /// Ordering key; lower values sit nearer the head of the queue.
    #[serde(default)]
    pub priority: u32,
    /// Seconds to wait before the first run.
    #[serde(default)]
    pub delay_secs: i64,
    /// When set, every run reschedules the check this many seconds out.
    #[serde(default)]
    pub interval_secs: Option<i64>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    // command
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub warn_exit_codes: Vec<i32>,

    // http
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub warn_latency_ms: Option<u64>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl CheckSpec {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Build the runnable test described by this spec, queued with its
    /// initial delay.
    pub fn build(&self) -> Result<ScheduledTest> {
        self.build_with_delay(self.delay_secs)
    }

    pub(crate) fn build_with_delay(&self, delay: i64) -> Result<ScheduledTest> {
        tracing::debug!(check = %self.name, kind = %self.kind, delay, "building check");
        let test: Box<dyn Test> = match self.kind {
            CheckKind::Command => Box::new(command::CommandCheck::new(self.clone())?),
            CheckKind::Http => Box::new(http::HttpCheck::new(self.clone())?),
        };
        Ok(ScheduledTest::new(self.priority, delay, test))
    }

    /// The follow-up run for a recurring check, if any.
    pub(crate) fn reschedule(&self) -> Option<ScheduledTest> {
        let interval = self.interval_secs?;
        match self.build_with_delay(interval) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::error!(check = %self.name, error = %e, "failed to reschedule check");
                None
            }
        }
    }
}

/// Build every configured check.
pub fn build_all(specs: &[CheckSpec]) -> Result<Vec<ScheduledTest>> {
    specs.iter().map(CheckSpec::build).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_spec() -> CheckSpec {
        toml::from_str(
            r#"
            name = "echo"
            kind = "command"
            program = "echo"
            args = ["hello"]
            priority = 3
            delay_secs = 15
            interval_secs = 60
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_spec_defaults() {
        let spec: CheckSpec = toml::from_str(
            r#"
            name = "site"
            kind = "http"
            url = "http://localhost"
            "#,
        )
        .unwrap();
        assert_eq!(spec.priority, 0);
        assert_eq!(spec.delay_secs, 0);
        assert_eq!(spec.interval_secs, None);
        assert_eq!(spec.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_build_uses_initial_delay_and_priority() {
        let item = command_spec().build().unwrap();
        assert_eq!(item.priority(), 3);
        assert_eq!(item.delay(), 15);
        assert_eq!(item.name(), "echo");
    }

    #[test]
    fn test_reschedule_uses_interval() {
        let next = command_spec().reschedule().unwrap();
        assert_eq!(next.delay(), 60);
        assert_eq!(next.priority(), 3);
    }

    #[test]
    fn test_one_shot_check_does_not_reschedule() {
        let mut spec = command_spec();
        spec.interval_secs = None;
        assert!(spec.reschedule().is_none());
    }

    #[test]
    fn test_command_check_requires_program() {
        let mut spec = command_spec();
        spec.program = None;
        assert!(spec.build().is_err());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(Outcome::Success.as_str(), "success");
        assert_eq!(Outcome::warning("x").as_str(), "warning");
        assert_eq!(Outcome::failure("x").as_str(), "failure");
    }
}
