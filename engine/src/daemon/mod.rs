//! Daemon lifecycle management
//!
//! `gantry serve` runs in the foreground until SIGINT or SIGTERM. This module
//! handles:
//! - PID file management (`<data_dir>/gantry.pid`)
//! - Loading every configured plugin source at startup
//! - Stopping every backend on shutdown
//! - Detection of already-running instances and stale PID files
//!
//! # Examples
//!
//! ```no_run
//! use gantry_engine::config::Config;
//! use gantry_engine::daemon::{install_signal_handler, DaemonManager};
//! use gantry_engine::host::Host;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! let manager = DaemonManager::new(&config);
//! let host = Host::from_config(config)?;
//! manager.run(&host, install_signal_handler()).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::Config;
use crate::host::Host;
use sdk::errors::EngineError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, EngineError>;

const PID_FILE: &str = "gantry.pid";

/// How long `stop` waits for the daemon to exit
const STOP_TIMEOUT: Duration = Duration::from_secs(35);

/// Daemon status information
#[derive(Debug, Clone)]
pub struct DaemonStatus {
    pub is_running: bool,
    pub pid: Option<u32>,
    pub pid_file: PathBuf,
}

#[derive(Debug)]
pub struct DaemonManager {
    pid_file: PathBuf,
}

impl DaemonManager {
    pub fn new(config: &Config) -> Self {
        Self {
            pid_file: pid_file_path(config),
        }
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Load all plugins, then serve until `shutdown` fires
    ///
    /// # Errors
    ///
    /// - `EngineError::DaemonAlreadyRunning` if another live process owns the PID file
    /// - Discovery errors that abort a whole load pass
    pub async fn run(&self, host: &Host, shutdown: CancellationToken) -> Result<()> {
        if let Some(pid) = self.running_pid()? {
            return Err(EngineError::DaemonAlreadyRunning(pid));
        }
        self.write_pid_file()?;

        let result = self.serve(host, shutdown).await;

        host.shutdown().await;
        self.remove_pid_file();
        result
    }

    async fn serve(&self, host: &Host, shutdown: CancellationToken) -> Result<()> {
        let loaded = tokio::select! {
            loaded = host.load_all() => loaded?,
            _ = shutdown.cancelled() => {
                info!("Shutdown requested during startup");
                return Ok(());
            }
        };

        for error in host.load_errors().await {
            warn!(
                plugin_id = error.plugin_id.as_deref().unwrap_or("-"),
                path = %error.path.display(),
                stage = %error.stage,
                error = %error.message,
                "Plugin not loaded"
            );
        }
        info!(plugins = loaded.len(), pid = std::process::id(), "Gantry is serving");

        shutdown.cancelled().await;
        info!("Shutting down");
        Ok(())
    }

    /// Ask a running daemon to stop and wait for it to exit
    ///
    /// # Errors
    ///
    /// Returns an error if no PID file exists or the process cannot be signaled.
    pub async fn stop(config: &Config) -> Result<()> {
        let pid_file = pid_file_path(config);
        let pid = read_pid_file(&pid_file)?;

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            info!(pid, "Sending SIGTERM to daemon");
            kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
                EngineError::Io(std::io::Error::other(format!("Failed to send SIGTERM: {}", e)))
            })?;

            let exited = tokio::time::timeout(STOP_TIMEOUT, async {
                while is_process_running(pid) {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            })
            .await
            .is_ok();

            if exited {
                info!(pid, "Daemon stopped");
            } else {
                warn!(pid, "Daemon did not stop within {}s", STOP_TIMEOUT.as_secs());
            }
            if pid_file.exists() {
                fs::remove_file(&pid_file)?;
            }
            Ok(())
        }

        #[cfg(not(unix))]
        {
            Err(EngineError::Config(format!(
                "Stopping PID {} is only supported on Unix",
                pid
            )))
        }
    }

    pub fn status(config: &Config) -> DaemonStatus {
        let pid_file = pid_file_path(config);
        let pid = read_pid_file(&pid_file).ok().filter(|pid| is_process_running(*pid));
        DaemonStatus {
            is_running: pid.is_some(),
            pid,
            pid_file,
        }
    }

    /// PID of a live daemon; a stale PID file is removed
    fn running_pid(&self) -> Result<Option<u32>> {
        if !self.pid_file.exists() {
            return Ok(None);
        }
        let pid = read_pid_file(&self.pid_file)?;
        if pid != std::process::id() && is_process_running(pid) {
            return Ok(Some(pid));
        }
        debug!(pid, path = %self.pid_file.display(), "Removing stale PID file");
        fs::remove_file(&self.pid_file)?;
        Ok(None)
    }

    fn write_pid_file(&self) -> Result<()> {
        let pid = std::process::id();
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.pid_file, pid.to_string())?;
        debug!(pid, path = %self.pid_file.display(), "Wrote PID file");
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Err(e) = fs::remove_file(&self.pid_file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.pid_file.display(), error = %e, "Failed to remove PID file");
            }
        }
    }
}

/// Cancel the returned token on SIGINT or SIGTERM
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("Received SIGINT"),
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler, listening for SIGINT only");
                    let _ = ctrl_c.await;
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Received Ctrl+C");
        }

        trigger.cancel();
    });

    token
}

fn pid_file_path(config: &Config) -> PathBuf {
    config.core.data_dir.join(PID_FILE)
}

fn read_pid_file(pid_file: &Path) -> Result<u32> {
    let content = fs::read_to_string(pid_file)?;
    content
        .trim()
        .parse::<u32>()
        .map_err(|e| EngineError::Config(format!("Invalid PID in file: {}", e)))
}

fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        // Signal 0 only checks that the process exists
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_repo::RepositoryClient;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.core.data_dir = temp.path().join("data");
        config.core.plugins_dir = temp.path().join("plugins");
        fs::create_dir_all(&config.core.plugins_dir).unwrap();
        config
    }

    fn host(config: Config) -> Host {
        let repo = RepositoryClient::new("http://127.0.0.1:9").unwrap();
        Host::new(config, None, Arc::new(repo)).unwrap()
    }

    #[tokio::test]
    async fn test_run_writes_and_removes_pid_file() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let manager = DaemonManager::new(&config);
        let host = host(config);

        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        let pid_file = manager.pid_file().to_path_buf();
        let watcher = tokio::spawn(async move {
            for _ in 0..200 {
                if pid_file.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let seen = pid_file.exists();
            trigger.cancel();
            seen
        });

        manager.run(&host, shutdown).await.unwrap();
        assert!(watcher.await.unwrap());
        assert!(!manager.pid_file().exists());
        assert!(host.cancel_token().is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_live_pid_file_blocks_second_instance() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let manager = DaemonManager::new(&config);
        fs::create_dir_all(manager.pid_file().parent().unwrap()).unwrap();
        // The test runner's parent is alive and owned by the same user
        let parent = std::os::unix::process::parent_id();
        fs::write(manager.pid_file(), parent.to_string()).unwrap();

        let result = manager.run(&host(config), CancellationToken::new()).await;
        assert!(matches!(result, Err(EngineError::DaemonAlreadyRunning(pid)) if pid == parent));
        assert!(manager.pid_file().exists());
    }

    #[test]
    fn test_stale_pid_file_is_removed() {
        let temp = TempDir::new().unwrap();
        let manager = DaemonManager::new(&test_config(&temp));
        fs::create_dir_all(manager.pid_file().parent().unwrap()).unwrap();
        fs::write(manager.pid_file(), "4194303").unwrap();

        assert_eq!(manager.running_pid().unwrap(), None);
        assert!(!manager.pid_file().exists());
    }

    #[test]
    fn test_status_without_pid_file() {
        let temp = TempDir::new().unwrap();
        let status = DaemonManager::status(&test_config(&temp));
        assert!(!status.is_running);
        assert!(status.pid.is_none());
        assert!(status.pid_file.ends_with(PID_FILE));
    }
}
