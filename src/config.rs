//! TOML configuration for the test controller.
//!
//! Lookup order: an explicit path, the `TESTWARDEN_CONFIG` environment
//! variable, `/etc/testwarden/testwarden.toml`, then compiled-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::checks::CheckSpec;
use crate::notify::logfile::LogFormat;

pub const CONFIG_ENV: &str = "TESTWARDEN_CONFIG";
pub const SYSTEM_CONFIG_PATH: &str = "/etc/testwarden/testwarden.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub checks: Vec<CheckSpec>,
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), checks = config.checks.len(), "loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config to use. An explicit path must load; the fallbacks
    /// only warn.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "TESTWARDEN_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return Ok(cfg),
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        if self.daemon.rest_interval_secs == 0 {
            anyhow::bail!("daemon.rest_interval_secs must be at least 1");
        }
        for check in &self.checks {
            if matches!(check.interval_secs, Some(i) if i <= 0) {
                anyhow::bail!("check '{}': interval_secs must be positive", check.name);
            }
            // Surfaces a missing program/url before the controller starts.
            check
                .build()
                .with_context(|| format!("invalid check '{}'", check.name))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub pid_file: PathBuf,
    /// Seconds slept between loop iterations.
    pub rest_interval_secs: u64,
    /// How long `stop` waits for the running controller to exit.
    pub stop_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: std::env::temp_dir().join("testwarden.pid"),
            rest_interval_secs: 10,
            stop_timeout_secs: 30,
        }
    }
}

impl DaemonConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// Notify
// ---------------------------------------------------------------------------

/// Where outcomes go. No `log_file` means the console.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub log_file: Option<PathBuf>,
    pub format: LogFormat,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit log events as JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.daemon.rest_interval_secs, 10);
        assert_eq!(cfg.daemon.stop_timeout(), Duration::from_secs(30));
        assert!(cfg.daemon.pid_file.ends_with("testwarden.pid"));
        assert!(cfg.notify.log_file.is_none());
        assert_eq!(cfg.notify.format, LogFormat::Text);
        assert!(cfg.checks.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let cfg = Config::parse(
            r#"
            [daemon]
            pid_file = "/run/testwarden.pid"
            rest_interval_secs = 5

            [notify]
            log_file = "/var/log/testwarden/notify.log"
            format = "json"

            [logging]
            json = true

            [[checks]]
            name = "disk"
            kind = "command"
            program = "true"
            interval_secs = 300

            [[checks]]
            name = "site"
            kind = "http"
            url = "https://example.com"
            priority = 1
            warn_latency_ms = 800
            "#,
        )
        .unwrap();

        assert_eq!(cfg.daemon.pid_file, PathBuf::from("/run/testwarden.pid"));
        assert_eq!(cfg.daemon.rest_interval_secs, 5);
        assert_eq!(cfg.daemon.stop_timeout_secs, 30);
        assert_eq!(cfg.notify.format, LogFormat::Json);
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.checks.len(), 2);
        assert_eq!(cfg.checks[1].warn_latency_ms, Some(800));
    }

    #[test]
    fn test_sample_config_parses() {
        let cfg = Config::parse(include_str!("../testwarden.toml.sample")).unwrap();
        assert_eq!(cfg.checks.len(), 2);
        assert_eq!(cfg.checks[1].interval_secs, Some(60));
    }

    #[test]
    fn test_zero_rest_interval_rejected() {
        assert!(Config::parse("[daemon]\nrest_interval_secs = 0\n").is_err());
    }

    #[test]
    fn test_check_without_program_rejected() {
        let err = Config::parse(
            r#"
            [[checks]]
            name = "broken"
            kind = "command"
            "#,
        )
        .unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));
    }

    #[test]
    fn test_explicit_missing_path_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::resolve(Some(dir.path().join("missing.toml").as_path())).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testwarden.toml");
        std::fs::write(&path, "[daemon]\nrest_interval_secs = 2\n").unwrap();
        let cfg = Config::resolve(Some(path.as_path())).unwrap();
        assert_eq!(cfg.daemon.rest_interval_secs, 2);
    }
}
