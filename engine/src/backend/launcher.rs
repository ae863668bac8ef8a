//! Starting backend processes
//!
//! [`SubprocessLauncher`] spawns the plugin executable with piped stdio.
//! [`InProcessLauncher`] runs a serving future on duplex pipes instead, which is
//! how tests exercise the handshake and RPC paths without building binaries.

use crate::plugin::fs::PluginFs;
use async_trait::async_trait;
use futures::future::BoxFuture;
use sdk::errors::EngineError;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Pipe buffer for in-process plugins
const DUPLEX_BUFFER: usize = 64 * 1024;

/// Everything needed to start one backend
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub plugin_id: String,
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
    /// Protocol versions the host offers
    pub offered_versions: Vec<u32>,
}

/// A started process: its pipes and a handle to stop it
pub struct PluginProcess {
    pub stdin: Box<dyn AsyncWrite + Unpin + Send>,
    pub stdout: Box<dyn AsyncRead + Unpin + Send>,
    pub handle: ProcessHandle,
}

/// Ownership of the running process
pub enum ProcessHandle {
    Child(Child),
    Task(JoinHandle<()>),
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Child(child) => write!(f, "Child({:?})", child.id()),
            Self::Task(_) => write!(f, "Task"),
        }
    }
}

impl ProcessHandle {
    /// Wait up to `limit` for the process to exit; `true` if it did
    pub async fn wait(&mut self, limit: Duration) -> bool {
        match self {
            Self::Child(child) => tokio::time::timeout(limit, child.wait()).await.is_ok(),
            Self::Task(task) => {
                if task.is_finished() {
                    return true;
                }
                tokio::time::timeout(limit, task).await.is_ok()
            }
        }
    }

    /// Send SIGTERM where supported
    pub fn terminate(&mut self) {
        match self {
            #[cfg(unix)]
            Self::Child(child) => {
                use nix::sys::signal::{kill, Signal};
                use nix::unistd::Pid;

                if let Some(pid) = child.id() {
                    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                        debug!(pid, error = %e, "Failed to send SIGTERM");
                    }
                }
            }
            #[cfg(not(unix))]
            Self::Child(_) => {}
            Self::Task(_) => {}
        }
    }

    /// Kill immediately
    pub async fn kill(&mut self) {
        match self {
            Self::Child(child) => {
                if let Err(e) = child.kill().await {
                    debug!(error = %e, "Failed to kill plugin process");
                }
            }
            Self::Task(task) => task.abort(),
        }
    }
}

/// Starts backend processes
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<PluginProcess, EngineError>;
}

/// Spawns the plugin executable as a child process
#[derive(Debug, Default, Clone)]
pub struct SubprocessLauncher;

#[async_trait]
impl Launcher for SubprocessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<PluginProcess, EngineError> {
        debug!(
            plugin_id = %spec.plugin_id,
            executable = %spec.executable.display(),
            "Spawning backend process"
        );

        let mut child = Command::new(&spec.executable)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Handshake {
                plugin_id: spec.plugin_id.clone(),
                reason: format!("failed to start {}: {}", spec.executable.display(), e),
            })?;

        let missing = |pipe: &str| EngineError::Handshake {
            plugin_id: spec.plugin_id.clone(),
            reason: format!("{} was not captured", pipe),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        if let Some(stderr) = child.stderr.take() {
            let plugin_id = spec.plugin_id.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(plugin_id = %plugin_id, "{}", line);
                }
            });
        }

        Ok(PluginProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            handle: ProcessHandle::Child(child),
        })
    }
}

/// Serving future for an in-process plugin
pub type ServeFn = Arc<
    dyn Fn(LaunchSpec, ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) -> BoxFuture<'static, ()>
        + Send
        + Sync,
>;

/// Runs plugins as tasks on duplex pipes
#[derive(Clone)]
pub struct InProcessLauncher {
    serve: ServeFn,
}

impl InProcessLauncher {
    pub fn new<F>(serve: F) -> Self
    where
        F: Fn(LaunchSpec, ReadHalf<DuplexStream>, WriteHalf<DuplexStream>) -> BoxFuture<'static, ()>
            + Send
            + Sync
            + 'static,
    {
        Self {
            serve: Arc::new(serve),
        }
    }
}

impl fmt::Debug for InProcessLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessLauncher").finish_non_exhaustive()
    }
}

#[async_trait]
impl Launcher for InProcessLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<PluginProcess, EngineError> {
        let (host, plugin) = tokio::io::duplex(DUPLEX_BUFFER);
        let (plugin_read, plugin_write) = tokio::io::split(plugin);
        let (host_read, host_write) = tokio::io::split(host);

        let task = tokio::spawn((self.serve)(spec.clone(), plugin_read, plugin_write));

        Ok(PluginProcess {
            stdin: Box::new(host_write),
            stdout: Box::new(host_read),
            handle: ProcessHandle::Task(task),
        })
    }
}

/// Locate the backend executable inside the plugin directory
///
/// `<executable>_<os>_<arch>` (plus `.exe` on Windows) is preferred, falling back
/// to `<executable>` itself.
pub fn resolve_executable(fs: &PluginFs, executable: &str) -> Result<PathBuf, EngineError> {
    let suffix = if cfg!(windows) { ".exe" } else { "" };
    let platform = format!(
        "{}_{}_{}{}",
        executable,
        gantry_repo::repository::os_name(),
        gantry_repo::repository::arch_name(),
        suffix
    );

    if let Ok(path) = fs.resolve(&platform) {
        return Ok(path);
    }

    let plain = format!("{}{}", executable, suffix);
    fs.resolve(&plain).map_err(|e| {
        warn!(executable = %plain, error = %e, "Backend executable not found");
        e
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_platform_specific_executable_wins() {
        let temp = tempfile::tempdir().unwrap();
        let platform = format!(
            "gpx_ds_{}_{}{}",
            gantry_repo::repository::os_name(),
            gantry_repo::repository::arch_name(),
            if cfg!(windows) { ".exe" } else { "" }
        );
        fs::write(temp.path().join(&platform), "").unwrap();
        fs::write(temp.path().join("gpx_ds"), "").unwrap();

        let view = PluginFs::new(temp.path()).unwrap();
        let resolved = resolve_executable(&view, "gpx_ds").unwrap();
        assert!(resolved.ends_with(&platform));
    }

    #[cfg(unix)]
    #[test]
    fn test_plain_executable_fallback_and_escape() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("p");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("gpx_ds"), "").unwrap();

        let view = PluginFs::new(&dir).unwrap();
        assert!(resolve_executable(&view, "gpx_ds").unwrap().ends_with("gpx_ds"));
        assert!(resolve_executable(&view, "../gpx_ds").is_err());
        assert!(resolve_executable(&view, "missing").is_err());
    }

    #[tokio::test]
    async fn test_in_process_task_can_be_stopped() {
        let launcher = InProcessLauncher::new(|_spec, _r, _w| {
            Box::pin(async {
                std::future::pending::<()>().await;
            })
        });
        let spec = LaunchSpec {
            plugin_id: "p".into(),
            executable: PathBuf::from("unused"),
            working_dir: PathBuf::from("."),
            env: vec![],
            offered_versions: vec![2],
        };
        let mut process = launcher.launch(&spec).await.unwrap();
        assert!(!process.handle.wait(Duration::from_millis(20)).await);
        process.handle.kill().await;
        assert!(process.handle.wait(Duration::from_secs(1)).await);
    }
}
