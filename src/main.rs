use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use testwarden::config::Config;
use testwarden::daemon::{self, DaemonError, PidFile};

#[derive(Parser)]
#[command(
    name = "testwarden",
    about = "Long-running test controller: scheduled checks with pass, warning and failure notifications",
    version,
    long_about = None
)]
struct Cli {
    /// The action to perform
    #[arg(value_enum)]
    action: Action,

    /// File path to log notifications to. Uses the console if not provided
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Action {
    /// Run the controller in the foreground until stopped
    Start,
    /// Stop the running controller
    Stop,
    /// Stop the running controller, then start
    Restart,
}

/// Stderr subscriber used while the config is being resolved, so lookup
/// warnings are not lost before the configured subscriber exists.
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        Config::resolve(cli.config.as_deref())
    })?;
    if let Some(path) = cli.log_file {
        config.notify.log_file = Some(path);
    }

    init_tracing(&config);

    let pidfile = PidFile::new(&config.daemon.pid_file);

    match cli.action {
        Action::Start => {
            tracing::info!(checks = config.checks.len(), "Starting test controller");
            let scheduler = testwarden::build_scheduler(&config).await?;
            let stats = daemon::start(&pidfile, scheduler).await?;
            println!(
                "Passed: {}  Warnings: {}  Failures: {}",
                stats.success, stats.warning, stats.failure
            );
        }
        Action::Stop => match daemon::stop(&pidfile, config.daemon.stop_timeout()).await {
            Ok(()) => println!("Stopped."),
            Err(DaemonError::NotRunning { path }) => {
                println!("pidfile {} does not exist. Not running?", path);
            }
            Err(e) => return Err(e.into()),
        },
        Action::Restart => {
            let scheduler = testwarden::build_scheduler(&config).await?;
            daemon::restart(&pidfile, config.daemon.stop_timeout(), scheduler).await?;
        }
    }

    Ok(())
}
