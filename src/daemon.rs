//! Process lifecycle: pidfile, start/stop/restart, and the liveness signal
//! the scheduler polls.
//!
//! The controller runs in the foreground (suitable for systemd or a
//! supervisor). `start` records our pid in the pidfile; `stop` signals that
//! pid with SIGTERM and removes the pidfile once the process is gone. A
//! controller that outlives the grace period keeps its pidfile, so a later
//! `start` refuses to run beside it. The running loop keeps going
//! only while its keep-running flag is set *and* the pidfile still exists,
//! so either mechanism stops it at the top of the next iteration.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::scheduler::{RunStats, Scheduler};

/// Polled by the scheduler at the top of every iteration.
pub trait Liveness: Send + Sync {
    fn should_keep_running(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("already running with pid {pid} (pidfile {path})")]
    AlreadyRunning { pid: i32, path: String },

    #[error("not running (no pidfile at {path})")]
    NotRunning { path: String },

    #[error("invalid pidfile {path}: {content:?}")]
    InvalidPidFile { path: String, content: String },

    #[error("pidfile {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: io::Error,
    },

    #[error("pid {pid} still running {secs}s after SIGTERM")]
    StopTimeout { pid: i32, secs: u64 },

    #[error("failed to install signal handler: {0}")]
    SignalHandler(#[source] io::Error),
}

// ---------------------------------------------------------------------------
// PidFile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn io_err(&self, source: io::Error) -> DaemonError {
        DaemonError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }

    /// The recorded pid, or `None` when there is no pidfile.
    pub fn read(&self) -> Result<Option<i32>, DaemonError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };
        content
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .map(Some)
            .ok_or_else(|| DaemonError::InvalidPidFile {
                path: self.path.display().to_string(),
                content,
            })
    }

    pub fn write(&self, pid: i32) -> Result<(), DaemonError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        std::fs::write(&self.path, format!("{}\n", pid)).map_err(|e| self.io_err(e))
    }

    pub fn remove(&self) -> Result<(), DaemonError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    /// Claim the pidfile for `pid`. A pidfile naming a dead process is
    /// treated as stale and overwritten.
    pub fn acquire(&self, pid: i32) -> Result<(), DaemonError> {
        match self.read() {
            Ok(Some(existing)) if existing != pid && process_alive(existing) => {
                return Err(DaemonError::AlreadyRunning {
                    pid: existing,
                    path: self.path.display().to_string(),
                });
            }
            Ok(Some(existing)) => {
                if existing != pid {
                    warn!(pid = existing, path = %self.path.display(), "removing stale pidfile");
                }
            }
            Ok(None) => {}
            Err(DaemonError::InvalidPidFile { content, .. }) => {
                warn!(path = %self.path.display(), %content, "overwriting unreadable pidfile");
            }
            Err(e) => return Err(e),
        }
        self.write(pid)?;
        debug!(pid, path = %self.path.display(), "pidfile written");
        Ok(())
    }

    /// Remove the pidfile if it still names `pid`.
    pub fn release(&self, pid: i32) -> Result<(), DaemonError> {
        match self.read() {
            Ok(Some(existing)) if existing == pid => self.remove(),
            Ok(_) | Err(DaemonError::InvalidPidFile { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Signal 0 probes for existence; EPERM means it exists but is not ours.
pub fn process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    let rc = unsafe { libc::kill(pid, 0) };
    rc == 0 || io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn send_signal(pid: i32, signal: libc::c_int) -> Result<(), DaemonError> {
    let rc = unsafe { libc::kill(pid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(DaemonError::Signal {
            pid,
            source: io::Error::last_os_error(),
        })
    }
}

// ---------------------------------------------------------------------------
// PidFileHost
// ---------------------------------------------------------------------------

/// Liveness backed by a keep-running flag and the pidfile's existence.
#[derive(Debug, Clone)]
pub struct PidFileHost {
    pidfile: PathBuf,
    keep_running: Arc<AtomicBool>,
}

impl PidFileHost {
    pub fn new(pidfile: impl Into<PathBuf>) -> Self {
        Self {
            pidfile: pidfile.into(),
            keep_running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn request_stop(&self) {
        self.keep_running.store(false, Ordering::SeqCst);
    }

    /// Clear the keep-running flag on SIGTERM or SIGINT.
    pub fn watch_signals(&self) -> Result<JoinHandle<()>, DaemonError> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = signal(SignalKind::terminate()).map_err(DaemonError::SignalHandler)?;
        let mut int = signal(SignalKind::interrupt()).map_err(DaemonError::SignalHandler)?;
        let host = self.clone();

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = term.recv() => info!("SIGTERM received, stopping after the current iteration"),
                _ = int.recv() => info!("SIGINT received, stopping after the current iteration"),
            }
            host.request_stop();
        }))
    }
}

impl Liveness for PidFileHost {
    fn should_keep_running(&self) -> bool {
        self.keep_running.load(Ordering::SeqCst) && self.pidfile.exists()
    }
}

// ---------------------------------------------------------------------------
// start / stop / restart
// ---------------------------------------------------------------------------

/// Claim the pidfile and run `scheduler` in the foreground until stopped.
pub async fn start(pidfile: &PidFile, mut scheduler: Scheduler) -> anyhow::Result<RunStats> {
    let pid = std::process::id() as i32;
    pidfile.acquire(pid)?;
    info!(pid, pidfile = %pidfile.path().display(), "test controller starting");

    let host = PidFileHost::new(pidfile.path());
    let watcher = match host.watch_signals() {
        Ok(w) => w,
        Err(e) => {
            pidfile.release(pid)?;
            return Err(e.into());
        }
    };

    let result = scheduler.run(&host).await;

    watcher.abort();
    pidfile.release(pid)?;

    Ok(result?)
}

/// Signal the recorded process to stop and wait up to `grace` for it.
pub async fn stop(pidfile: &PidFile, grace: Duration) -> Result<(), DaemonError> {
    let pid = pidfile.read()?.ok_or_else(|| DaemonError::NotRunning {
        path: pidfile.path().display().to_string(),
    })?;

    if !process_alive(pid) {
        warn!(pid, "pidfile names a dead process, removing it");
        return pidfile.remove();
    }

    info!(pid, "stopping test controller");
    send_signal(pid, libc::SIGTERM)?;

    let deadline = tokio::time::Instant::now() + grace;
    while process_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            warn!(pid, pidfile = %pidfile.path().display(), "controller did not exit, pidfile left in place");
            return Err(DaemonError::StopTimeout {
                pid,
                secs: grace.as_secs(),
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // The controller normally releases it on exit.
    pidfile.release(pid)?;
    info!(pid, "test controller stopped");
    Ok(())
}

/// `stop` (tolerating a controller that is not running), then `start`.
pub async fn restart(pidfile: &PidFile, grace: Duration, scheduler: Scheduler) -> anyhow::Result<RunStats> {
    match stop(pidfile, grace).await {
        Ok(()) => {}
        Err(DaemonError::NotRunning { .. }) => {
            info!("test controller was not running");
        }
        Err(e) => return Err(e.into()),
    }
    start(pidfile, scheduler).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn own_pid() -> i32 {
        std::process::id() as i32
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        assert_eq!(pf.read().unwrap(), None);
    }

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("run").join("x.pid"));
        pf.write(4242).unwrap();
        assert_eq!(pf.read().unwrap(), Some(4242));
        pf.remove().unwrap();
        assert!(!pf.exists());
        pf.remove().unwrap();
    }

    #[test]
    fn test_garbage_pidfile_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.pid");
        std::fs::write(&path, "not-a-pid").unwrap();
        assert!(matches!(
            PidFile::new(&path).read(),
            Err(DaemonError::InvalidPidFile { .. })
        ));
    }

    #[test]
    fn test_acquire_refuses_live_process() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        pf.write(own_pid()).unwrap();
        // Another pid trying to claim a pidfile held by a live process.
        let err = pf.acquire(own_pid() + 1).unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }));
    }

    #[test]
    fn test_acquire_replaces_stale_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        pf.write(i32::MAX).unwrap();
        pf.acquire(own_pid()).unwrap();
        assert_eq!(pf.read().unwrap(), Some(own_pid()));
    }

    #[test]
    fn test_release_only_removes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        pf.write(4242).unwrap();
        pf.release(own_pid()).unwrap();
        assert!(pf.exists());
        pf.release(4242).unwrap();
        assert!(!pf.exists());
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(own_pid()));
        assert!(!process_alive(0));
        assert!(!process_alive(i32::MAX));
    }

    #[test]
    fn test_host_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.pid");
        let host = PidFileHost::new(&path);
        assert!(!host.should_keep_running());

        std::fs::write(&path, "1").unwrap();
        assert!(host.should_keep_running());

        host.request_stop();
        assert!(!host.should_keep_running());
    }

    #[tokio::test]
    async fn test_stop_without_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        let err = stop(&pf, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, DaemonError::NotRunning { .. }));
    }

    /// Spawn `sh -c script` and reap it on a background thread so an exited
    /// child does not linger as a zombie that still answers signal 0.
    fn spawn_reaped(script: &str) -> (i32, std::thread::JoinHandle<()>) {
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .spawn()
            .unwrap();
        let pid = child.id() as i32;
        let reaper = std::thread::spawn(move || {
            let _ = child.wait();
        });
        (pid, reaper)
    }

    #[tokio::test]
    async fn test_stop_removes_pidfile_after_exit() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        let (pid, reaper) = spawn_reaped("sleep 30");
        pf.write(pid).unwrap();

        stop(&pf, Duration::from_secs(10)).await.unwrap();

        assert!(!pf.exists());
        assert!(!process_alive(pid));
        reaper.join().unwrap();
    }

    #[tokio::test]
    async fn test_stop_timeout_keeps_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        // Ignored dispositions survive exec, so sleep ignores SIGTERM too.
        let (pid, reaper) = spawn_reaped("trap '' TERM; sleep 30");
        pf.write(pid).unwrap();
        // Let the trap install before signalling.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = stop(&pf, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, DaemonError::StopTimeout { pid: p, .. } if p == pid));
        assert_eq!(pf.read().unwrap(), Some(pid));

        // A new controller must not start beside the survivor.
        assert!(matches!(
            pf.acquire(own_pid()),
            Err(DaemonError::AlreadyRunning { .. })
        ));

        send_signal(pid, libc::SIGKILL).unwrap();
        reaper.join().unwrap();
    }

    #[tokio::test]
    async fn test_stop_cleans_stale_pidfile() {
        let dir = tempfile::tempdir().unwrap();
        let pf = PidFile::new(dir.path().join("x.pid"));
        pf.write(i32::MAX).unwrap();
        stop(&pf, Duration::from_secs(1)).await.unwrap();
        assert!(!pf.exists());
    }
}
