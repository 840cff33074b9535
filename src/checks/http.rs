use super::{CheckSpec, Outcome, ScheduledTest, Test};
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::{Duration, Instant};

/// HTTP check: status code plus response latency.
#[derive(Debug)]
pub struct HttpCheck {
    spec: CheckSpec,
    url: String,
    client: Client,
}

impl HttpCheck {
    pub fn new(spec: CheckSpec) -> Result<Self> {
        let target = spec
            .url
            .clone()
            .with_context(|| format!("http check '{}' has no url", spec.name))?;

        let url = if target.starts_with("http") {
            target
        } else {
            format!("http://{}", target)
        };

        let client = Client::builder()
            .timeout(spec.timeout())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self { spec, url, client })
    }
}

/// Classify a completed request.
fn classify(status: reqwest::StatusCode, latency: Duration, warn_latency_ms: Option<u64>) -> Outcome {
    if !status.is_success() {
        return Outcome::failure(format!("HTTP {}", status));
    }

    let latency_ms = latency.as_millis() as u64;
    match warn_latency_ms {
        Some(limit) if latency_ms > limit => {
            Outcome::warning(format!("slow response: {}ms (limit {}ms)", latency_ms, limit))
        }
        _ => Outcome::Success,
    }
}

#[async_trait::async_trait]
impl Test for HttpCheck {
    fn name(&self) -> &str {
        &self.spec.name
    }

    async fn run(&mut self) -> Result<Outcome> {
        let start = Instant::now();
        let result = self.client.get(&self.url).send().await;
        let latency = start.elapsed();

        let outcome = match result {
            Ok(resp) => classify(resp.status(), latency, self.spec.warn_latency_ms),
            Err(e) => Outcome::failure(format!("request to {} failed: {}", self.url, e)),
        };

        tracing::debug!(
            check = %self.spec.name,
            url = %self.url,
            latency_ms = latency.as_millis() as u64,
            outcome = outcome.as_str(),
            "http check finished"
        );

        Ok(outcome)
    }

    fn new_tests(&mut self) -> Vec<ScheduledTest> {
        self.spec.reschedule().into_iter().collect()
    }
}
