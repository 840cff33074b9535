//! Append-only notification log.
//!
//! Each notification becomes one line in the configured file, either plain
//! text prefixed with an RFC 3339 timestamp or a JSON object. Writes are
//! serialized through a `tokio::sync::Mutex` and the file is opened in
//! append mode.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Notifier, NotifyLevel};

/// Line format of the notification log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    level: NotifyLevel,
    message: &'a str,
}

#[derive(Debug)]
pub struct LogFileNotifier {
    path: PathBuf,
    format: LogFormat,
    writer: Mutex<tokio::fs::File>,
}

impl LogFileNotifier {
    /// Open (or create) the log file at `path` in append mode.
    pub async fn open(path: impl Into<PathBuf>, format: LogFormat) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open notification log: {}", path.display()))?;

        debug!(path = %path.display(), ?format, "notification log opened");

        Ok(Self {
            path,
            format,
            writer: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(&self, level: NotifyLevel, message: &str) -> Result<String> {
        let timestamp = Utc::now().to_rfc3339();
        let mut line = match self.format {
            LogFormat::Text => format!("{} {}", timestamp, message),
            LogFormat::Json => serde_json::to_string(&LogEntry {
                timestamp,
                level,
                message,
            })
            .context("failed to serialize notification")?,
        };
        line.push('\n');
        Ok(line)
    }

    async fn append(&self, level: NotifyLevel, message: &str) -> Result<()> {
        let line = self.render(level, message)?;

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to write notification log: {}", self.path.display()))?;
        writer.flush().await.context("failed to flush notification log")?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for LogFileNotifier {
    async fn notify_success(&self, message: &str) -> Result<()> {
        self.append(NotifyLevel::Success, message).await
    }

    async fn notify_warning(&self, message: &str) -> Result<()> {
        self.append(NotifyLevel::Warning, message).await
    }

    async fn notify_failure(&self, message: &str) -> Result<()> {
        self.append(NotifyLevel::Failure, message).await
    }
}
