//! External command check: spawn, wait under a timeout, map the exit code.

use super::{CheckSpec, Outcome, ScheduledTest, Test};
use anyhow::{Context, Result};
use std::process::Stdio;
use tokio::process::Command;

/// Number of trailing stderr characters quoted in a non-success message.
const STDERR_TAIL: usize = 200;

#[derive(Debug)]
pub struct CommandCheck {
    spec: CheckSpec,
    program: String,
}

impl CommandCheck {
    pub fn new(spec: CheckSpec) -> Result<Self> {
        let program = spec
            .program
            .clone()
            .with_context(|| format!("command check '{}' has no program", spec.name))?;
        Ok(Self { spec, program })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL.saturating_sub(1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}

/// Map an exit code onto an outcome.
fn classify(code: Option<i32>, warn_codes: &[i32], stderr: &[u8]) -> Outcome {
    let detail = |label: String| {
        let tail = stderr_tail(stderr);
        if tail.is_empty() {
            label
        } else {
            format!("{}: {}", label, tail)
        }
    };

    match code {
        Some(0) => Outcome::Success,
        Some(c) if warn_codes.contains(&c) => Outcome::warning(detail(format!("exit code {}", c))),
        Some(c) => Outcome::failure(detail(format!("exit code {}", c))),
        None => Outcome::failure(detail("terminated by signal".to_string())),
    }
}

#[async_trait::async_trait]
impl Test for CommandCheck {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn run(&mut self) -> Result<Outcome> {
        let child = Command::new(&self.program)
            .args(&self.spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(c) => c,
            Err(e) => {
                return Ok(Outcome::failure(format!(
                    "failed to spawn '{}': {}",
                    self.program, e
                )))
            }
        };

        let outcome = match tokio::time::timeout(self.spec.timeout(), child.wait_with_output()).await {
            Ok(Ok(output)) => classify(output.status.code(), &self.spec.warn_exit_codes, &output.stderr),
            Ok(Err(e)) => Outcome::failure(format!("failed to wait for '{}': {}", self.program, e)),
            Err(_) => Outcome::failure(format!(
                "'{}' timed out after {}s",
                self.program, self.spec.timeout_secs
            )),
        };

        tracing::debug!(
            check = %self.spec.name,
            program = %self.program,
            outcome = outcome.as_str(),
            "command check finished"
        );

        Ok(outcome)
    }

    fn new_tests(&mut self) -> Vec<ScheduledTest> {
        self.spec.reschedule().into_iter().collect()
    }
}
