// ABOUTME: Wall-clock bound around one pipeline process.
// ABOUTME: Owns a private workspace root for the child and removes it however the child or wrapper ends.

use eic_core::config::WORKSPACE_ROOT_ENV;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::future::Future;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::signal::unix::{signal, Signal as SignalStream, SignalKind};
use tracing::{debug, warn};

/// Binary the wrapper supervises. Installed next to the wrapper.
pub const PIPELINE_BIN: &str = "eic-authorized-keys";

/// Default wall-clock budget for one lookup.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default parent of the private workspace root.
pub const DEFAULT_ROOT_PARENT: &str = "/dev/shm";

/// Exit code when the pipeline binary is not installed.
pub const EXIT_MISSING_PROGRAM: i32 = 127;

/// Exit code when the child could not be started or was killed by a signal.
pub const EXIT_FAILURE: i32 = 1;

/// Exit code when the time budget ran out: sshd sees "no keys".
pub const EXIT_TIMEOUT: i32 = 0;

/// Shell-style exit code for a wrapper stopped by `signal`.
pub fn signal_exit_code(signal: Signal) -> i32 {
    128 + signal as i32
}

/// Path of `name` in the directory holding the running executable.
pub fn sibling_binary(name: &str) -> std::io::Result<PathBuf> {
    Ok(std::env::current_exe()?.with_file_name(name))
}

/// Listeners for the signals that stop the wrapper early.
///
/// Install them before the workspace root exists so a signal can never
/// land between creating the root and watching for it.
pub struct TerminationSignals {
    terminate: SignalStream,
    hangup: SignalStream,
    interrupt: SignalStream,
}

impl TerminationSignals {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
            interrupt: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the first SIGTERM, SIGHUP or SIGINT.
    pub async fn recv(&mut self) -> Signal {
        tokio::select! {
            _ = self.terminate.recv() => Signal::SIGTERM,
            _ = self.hangup.recv() => Signal::SIGHUP,
            _ = self.interrupt.recv() => Signal::SIGINT,
        }
    }
}

/// Create a private workspace root, run `program` under `timeout`, then remove the root.
///
/// If `shutdown` resolves first, the child's process group is killed and the
/// root is still removed before returning.
pub async fn supervise(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
    root_parent: &Path,
    shutdown: impl Future<Output = Signal>,
) -> i32 {
    let root = match tempfile::Builder::new()
        .prefix("eic-run-")
        .tempdir_in(root_parent)
    {
        Ok(root) => root,
        Err(e) => {
            warn!(parent = %root_parent.display(), error = %e, "cannot create workspace root");
            return EXIT_FAILURE;
        }
    };

    let code = run_bounded(program, args, timeout, root.path(), shutdown).await;
    remove_root(root);
    code
}

fn remove_root(root: TempDir) {
    let path = root.path().to_path_buf();
    if let Err(e) = root.close() {
        warn!(path = %path.display(), error = %e, "failed to remove workspace root");
    }
}

/// How the wait on the child ended.
enum Ended {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Stopped(Signal),
}

/// Run `program` in its own process group with `workspace_root` exported to it.
///
/// stdout and stderr are inherited so key lines reach sshd directly. When
/// `timeout` elapses or `shutdown` resolves the whole group is killed.
pub async fn run_bounded(
    program: &Path,
    args: &[OsString],
    timeout: Duration,
    workspace_root: &Path,
    shutdown: impl Future<Output = Signal>,
) -> i32 {
    if !program.is_file() {
        warn!(program = %program.display(), "pipeline binary not found");
        return EXIT_MISSING_PROGRAM;
    }

    let mut command = std::process::Command::new(program);
    command
        .args(args)
        .env(WORKSPACE_ROOT_ENV, workspace_root)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .process_group(0);

    let mut child = match Command::from(command).kill_on_drop(true).spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(program = %program.display(), error = %e, "pipeline binary not found");
            return EXIT_MISSING_PROGRAM;
        }
        Err(e) => {
            warn!(program = %program.display(), error = %e, "failed to start pipeline");
            return EXIT_FAILURE;
        }
    };
    debug!(pid = ?child.id(), "pipeline started");

    let ended = tokio::select! {
        waited = tokio::time::timeout(timeout, child.wait()) => match waited {
            Ok(status) => Ended::Exited(status),
            Err(_) => Ended::TimedOut,
        },
        signal = shutdown => Ended::Stopped(signal),
    };

    match ended {
        Ended::Exited(Ok(status)) => exit_code(status),
        Ended::Exited(Err(e)) => {
            warn!(error = %e, "failed to wait for pipeline");
            EXIT_FAILURE
        }
        Ended::TimedOut => {
            warn!(timeout_ms = timeout.as_millis() as u64, "pipeline timed out");
            kill_group(&mut child).await;
            EXIT_TIMEOUT
        }
        Ended::Stopped(signal) => {
            warn!(%signal, "wrapper interrupted, stopping pipeline");
            kill_group(&mut child).await;
            signal_exit_code(signal)
        }
    }
}

/// SIGKILL the child's process group, then reap the child.
async fn kill_group(child: &mut Child) {
    if let Some(pid) = child.id() {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(error = %e, "killpg failed");
        }
    }
    if let Err(e) = child.kill().await {
        debug!(error = %e, "pipeline already gone");
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => {
            warn!(signal = ?status.signal(), "pipeline killed by signal");
            EXIT_FAILURE
        }
    }
}
