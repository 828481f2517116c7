//! Lifecycle supervision for the aria2 download daemon.
//!
//! The supervisor owns one daemon per (host, port) pair: it probes liveness
//! over RPC, launches `aria2c` as a detached background process when absent,
//! submits jobs fire-and-forget, and asks for a graceful shutdown on
//! teardown. It does not enforce mutual exclusion across independent
//! orchestrator processes; that is an operational concern.

mod rpc;

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

pub use rpc::{AddUriOptions, Aria2Rpc, HttpRpcClient, RpcError};

/// Observed lifecycle state of the daemon process.
///
/// Transitions: `Stopped -> Starting` on a start request after a failed
/// probe; `Starting -> Running` once a probe confirms liveness;
/// `Running -> Stopped` on an acknowledged shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    /// No live daemon is known at the configured endpoint.
    Stopped,
    /// A launch succeeded but liveness has not been confirmed yet.
    Starting,
    /// A probe has confirmed the daemon answers RPC.
    Running,
}

/// Job submission failure: the daemon was unreachable or rejected the job.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The RPC call could not be completed or was refused.
    #[error("daemon submission failed: {0}")]
    Rpc(#[from] RpcError),
}

/// Supervises one aria2 daemon: health probe, start-if-absent, job
/// submission, graceful shutdown.
pub struct Aria2Supervisor {
    rpc: Box<dyn Aria2Rpc>,
    rpc_port: u16,
    rpc_secret: String,
    save_dir: PathBuf,
    state: Mutex<DaemonState>,
    launched_here: AtomicBool,
}

impl Aria2Supervisor {
    /// Builds a supervisor over an arbitrary RPC transport (tests inject a
    /// fake here).
    pub fn new(
        rpc: Box<dyn Aria2Rpc>,
        rpc_port: u16,
        rpc_secret: impl Into<String>,
        save_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            rpc,
            rpc_port,
            rpc_secret: rpc_secret.into(),
            save_dir: resolve_save_dir(save_dir.into()),
            state: Mutex::new(DaemonState::Stopped),
            launched_here: AtomicBool::new(false),
        }
    }

    /// Builds a supervisor with the production HTTP JSON-RPC client.
    #[must_use]
    pub fn with_http(host: &str, rpc_port: u16, rpc_secret: &str, save_dir: &Path) -> Self {
        Self::new(
            Box::new(HttpRpcClient::new(host, rpc_port, rpc_secret)),
            rpc_port,
            rpc_secret,
            save_dir,
        )
    }

    /// Current observed daemon state.
    pub fn state(&self) -> DaemonState {
        self.state.lock().map_or(DaemonState::Stopped, |s| *s)
    }

    /// Whether this supervisor launched the daemon itself. A pre-existing
    /// daemon is not stopped at teardown.
    pub fn launched_here(&self) -> bool {
        self.launched_here.load(Ordering::SeqCst)
    }

    /// Lightweight liveness probe via `aria2.getVersion`.
    ///
    /// Returns false on any connection or protocol error; never fails.
    #[instrument(skip(self))]
    pub async fn is_running(&self) -> bool {
        match self.rpc.get_version().await {
            Ok(version) => {
                debug!(%version, "aria2 daemon is running");
                self.set_state(DaemonState::Running);
                true
            }
            Err(err) => {
                debug!(error = %err, "aria2 daemon liveness probe failed");
                self.set_state(DaemonState::Stopped);
                false
            }
        }
    }

    /// Starts the daemon if a liveness probe fails; no-op when already
    /// running.
    ///
    /// Returns true when the daemon is running or the launch command exited
    /// successfully. Liveness after a fresh launch is *not* re-verified here;
    /// it is established by the next [`is_running`](Self::is_running) or
    /// submission call, so callers must probe before relying on the daemon.
    #[instrument(skip(self))]
    pub async fn start(&self) -> bool {
        if self.is_running().await {
            info!("aria2 daemon is already running");
            return true;
        }
        self.set_state(DaemonState::Starting);

        let mut command = Command::new("aria2c");
        command
            .arg("--enable-rpc")
            .arg(format!("--rpc-listen-port={}", self.rpc_port))
            .arg("--rpc-listen-all=true")
            .arg(format!("--rpc-secret={}", self.rpc_secret))
            .arg(format!("--dir={}", self.save_dir.display()))
            .arg("--daemon=true");
        info!(port = self.rpc_port, dir = %self.save_dir.display(), "launching aria2c daemon");

        match command.output().await {
            Ok(output) if output.status.success() => {
                info!("aria2c daemon launched");
                self.launched_here.store(true, Ordering::SeqCst);
                true
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                error!(status = ?output.status.code(), %stderr, "aria2c launch failed");
                self.set_state(DaemonState::Stopped);
                false
            }
            Err(err) => {
                error!(error = %err, "failed to spawn aria2c");
                self.set_state(DaemonState::Stopped);
                false
            }
        }
    }

    /// Requests a graceful daemon shutdown.
    ///
    /// Returns true only when the daemon acknowledges; on failure the daemon
    /// is left running and further cleanup is the caller's responsibility.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> bool {
        match self.rpc.shutdown().await {
            Ok(()) => {
                info!("aria2 daemon shutdown acknowledged");
                self.set_state(DaemonState::Stopped);
                true
            }
            Err(err) => {
                warn!(error = %err, "aria2 daemon shutdown request failed");
                false
            }
        }
    }

    /// Submits one download job; fire-and-forget.
    ///
    /// The transfer is not awaited: a returned gid only means the daemon
    /// accepted the job.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn submit(
        &self,
        url: &str,
        save_dir: Option<&Path>,
        output_name: Option<&str>,
    ) -> Result<String, SubmissionError> {
        let options = AddUriOptions {
            dir: save_dir
                .map(|d| resolve_save_dir(d.to_path_buf()))
                .map(|d| d.display().to_string()),
            out: output_name.map(str::to_string),
        };
        let gid = self.rpc.add_uri(&[url.to_string()], options).await?;
        self.set_state(DaemonState::Running);
        info!(%gid, "download submitted to aria2");
        Ok(gid)
    }

    fn set_state(&self, next: DaemonState) {
        if let Ok(mut state) = self.state.lock() {
            *state = next;
        }
    }
}

/// Resolves the daemon save directory: absolute paths pass through, relative
/// paths resolve against the process working directory, and an empty path
/// means the working directory itself.
fn resolve_save_dir(dir: PathBuf) -> PathBuf {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    if dir.as_os_str().is_empty() {
        cwd
    } else if dir.is_absolute() {
        dir
    } else {
        cwd.join(dir)
    }
}
