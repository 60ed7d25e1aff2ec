//! # Subprocess plumbing.
//!
//! Spawns a backend with its standard streams captured, then hands the `Child` to an
//! exit watcher task that owns it until it is reaped. Signals go through the watcher
//! so nothing can ever signal a PID that has already been reaped and recycled.
//!
//! ```text
//! spawn() ──► Child ──► exit watcher ◄── ProcessControl::{terminate, kill}
//!   │                       │
//!   │                       └─► child.wait() ─► LastExit ─► Stopped | Crashed
//!   └─► stderr ──► diagnostic reader ─► Handle::push_log + LogReceived
//! ```

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use super::handle::Handle;
use super::state::{LastExit, RuntimeState};
use crate::client::StdioPipes;
use crate::events::Event;

/// Common per-user install locations added to `PATH` when they exist.
const USER_BIN_DIRS: &[&str] = &[".local/bin", ".cargo/bin"];
const SYSTEM_BIN_DIRS: &[&str] = &["/usr/local/bin", "/opt/homebrew/bin"];

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    Terminate,
    Kill,
}

/// Control side of a spawned subprocess, stored on its [`Handle`].
#[derive(Debug)]
pub(crate) struct ProcessControl {
    pid: u32,
    signals: mpsc::UnboundedSender<StopSignal>,
    exited: watch::Receiver<Option<LastExit>>,
}

impl ProcessControl {
    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// Asks the process to exit (SIGTERM on unix).
    pub(crate) fn terminate(&self) {
        let _ = self.signals.send(StopSignal::Terminate);
    }

    /// Forces the process down.
    pub(crate) fn kill(&self) {
        let _ = self.signals.send(StopSignal::Kill);
    }

    pub(crate) fn has_exited(&self) -> bool {
        self.exited.borrow().is_some()
    }

    /// Waits up to `limit` for the exit watcher to observe termination.
    pub(crate) async fn wait_exit(&self, limit: Duration) -> bool {
        let mut rx = self.exited.clone();
        matches!(
            tokio::time::timeout(limit, rx.wait_for(Option::is_some)).await,
            Ok(Ok(_))
        )
    }
}

/// A freshly spawned backend, before its background tasks start.
pub(crate) struct Spawned {
    pub(crate) child: Child,
    pub(crate) pipes: StdioPipes,
    pub(crate) stderr: ChildStderr,
    pub(crate) pid: u32,
}

/// Launch parameters taken from a subprocess `BackendConfig`.
pub(crate) struct Launch<'a> {
    pub(crate) command: &'a str,
    pub(crate) args: &'a [String],
    pub(crate) cwd: Option<&'a Path>,
    pub(crate) env: &'a HashMap<String, String>,
    pub(crate) extra_paths: &'a [PathBuf],
}

/// Spawns the backend with stdin/stdout for the protocol and stderr for diagnostics.
pub(crate) fn spawn(launch: &Launch<'_>) -> std::io::Result<Spawned> {
    let mut cmd = Command::new(launch.command);
    cmd.args(launch.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(path) = search_path(launch.extra_paths) {
        cmd.env("PATH", path);
    }
    cmd.envs(launch.env);
    if let Some(dir) = launch.cwd {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn()?;
    let missing = |what: &str| std::io::Error::other(format!("child {what} was not captured"));
    let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
    let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;
    let pid = child.id().ok_or_else(|| missing("pid"))?;

    Ok(Spawned {
        child,
        pipes: StdioPipes { stdin, stdout },
        stderr,
        pid,
    })
}

/// Starts the exit watcher and returns the control half for the handle.
pub(crate) fn watch_exit(handle: Arc<Handle>, mut child: Child, pid: u32) -> ProcessControl {
    let (sig_tx, mut sig_rx) = mpsc::unbounded_channel();
    let (exit_tx, exit_rx) = watch::channel(None);

    tokio::spawn(async move {
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                Some(sig) = sig_rx.recv() => send_signal(&mut child, sig, handle.id()),
            }
        };

        let exit = match status {
            Ok(status) => describe_exit(status),
            Err(e) => {
                warn!(server = %handle.id(), pid, error = %e, "waiting for backend failed");
                LastExit {
                    code: None,
                    signal: None,
                    at: Utc::now(),
                }
            }
        };

        // Operator-initiated exits are always clean; an exit before the handshake
        // finished is a startup failure.
        let (next, error) = if handle.stop_requested() {
            (RuntimeState::Stopped, None)
        } else if handle.state() == RuntimeState::Starting {
            let msg = format!("backend exited during startup ({})", summarize(&exit));
            (RuntimeState::Error, Some(msg))
        } else if exit.is_success() {
            (RuntimeState::Stopped, None)
        } else {
            (RuntimeState::Crashed, None)
        };
        debug!(server = %handle.id(), pid, code = ?exit.code, signal = ?exit.signal, "backend exited");

        handle.record_exit(exit.clone(), next, error);
        handle.cancel.cancel();
        handle.mark_tools_ready();
        exit_tx.send_replace(Some(exit));
    });

    ProcessControl {
        pid,
        signals: sig_tx,
        exited: exit_rx,
    }
}

/// Forwards every stderr line into the handle's ring and onto the bus until EOF.
pub(crate) fn read_diagnostics(handle: Arc<Handle>, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    handle.push_log(line.clone());
                    handle.bus().publish(Event::log(handle.id(), line));
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(server = %handle.id(), error = %e, "stderr read failed");
                    break;
                }
            }
        }
        trace!(server = %handle.id(), "stderr reader finished");
    });
}

fn send_signal(child: &mut Child, sig: StopSignal, server: &str) {
    match sig {
        StopSignal::Terminate => terminate(child, server),
        StopSignal::Kill => {
            if let Err(e) = child.start_kill() {
                debug!(server, error = %e, "kill failed");
            }
        }
    }
}

#[cfg(unix)]
fn terminate(child: &mut Child, server: &str) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    // `id()` is None once the child has been reaped.
    let Some(pid) = child.id().and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(server, pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, server: &str) {
    if let Err(e) = child.start_kill() {
        debug!(server, error = %e, "terminate failed");
    }
}

fn summarize(exit: &LastExit) -> String {
    match (&exit.code, &exit.signal) {
        (_, Some(sig)) => format!("killed by {sig}"),
        (Some(code), None) => format!("exit code {code}"),
        (None, None) => "unknown status".to_string(),
    }
}

fn describe_exit(status: ExitStatus) -> LastExit {
    LastExit {
        code: status.code(),
        signal: signal_name(&status),
        at: Utc::now(),
    }
}

#[cfg(unix)]
fn signal_name(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    let raw = status.signal()?;
    Some(match nix::sys::signal::Signal::try_from(raw) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) => format!("signal {raw}"),
    })
}

#[cfg(not(unix))]
fn signal_name(_status: &ExitStatus) -> Option<String> {
    None
}

/// Builds `PATH` as: configured extras, existing user/system bin dirs, then the
/// inherited value. Duplicates keep their first position.
pub(crate) fn search_path(extra: &[PathBuf]) -> Option<OsString> {
    let mut entries: Vec<PathBuf> = extra.to_vec();
    if let Some(home) = dirs::home_dir() {
        entries.extend(USER_BIN_DIRS.iter().map(|d| home.join(d)).filter(|d| d.is_dir()));
    }
    entries.extend(
        SYSTEM_BIN_DIRS
            .iter()
            .map(PathBuf::from)
            .filter(|d| d.is_dir()),
    );
    if let Some(current) = std::env::var_os("PATH") {
        entries.extend(std::env::split_paths(&current));
    }

    let mut seen = std::collections::HashSet::new();
    entries.retain(|d| seen.insert(d.clone()));
    match std::env::join_paths(entries) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!(error = %e, "could not build search path; inheriting PATH");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_path_puts_extras_first_and_dedups() {
        let tmp = tempfile::tempdir().unwrap();
        let extra = tmp.path().to_path_buf();
        let path = search_path(&[extra.clone(), extra.clone()]).unwrap();
        let parts: Vec<PathBuf> = std::env::split_paths(&path).collect();
        assert_eq!(parts[0], extra);
        assert_eq!(parts.iter().filter(|p| **p == extra).count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn exit_descriptions() {
        use std::os::unix::process::ExitStatusExt;

        let clean = describe_exit(ExitStatus::from_raw(0));
        assert_eq!(clean.code, Some(0));
        assert!(clean.is_success());

        let failed = describe_exit(ExitStatus::from_raw(3 << 8));
        assert_eq!(failed.code, Some(3));
        assert!(!failed.is_success());

        let termed = describe_exit(ExitStatus::from_raw(15));
        assert_eq!(termed.code, None);
        assert_eq!(termed.signal.as_deref(), Some("SIGTERM"));
        assert_eq!(summarize(&termed), "killed by SIGTERM");
        assert_eq!(summarize(&failed), "exit code 3");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_captures_streams_and_stderr() {
        let env = HashMap::from([("VISOR_TEST_MSG".to_string(), "hello".to_string())]);
        let args = vec!["-c".to_string(), "echo \"$VISOR_TEST_MSG\" >&2".to_string()];
        let mut spawned = spawn(&Launch {
            command: "sh",
            args: &args,
            cwd: None,
            env: &env,
            extra_paths: &[],
        })
        .unwrap();
        assert!(spawned.pid > 0);

        let mut lines = BufReader::new(spawned.stderr).lines();
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("hello"));
        assert!(spawned.child.wait().await.unwrap().success());
    }

    #[tokio::test]
    async fn spawn_reports_missing_binary() {
        let err = spawn(&Launch {
            command: "definitely-not-a-real-binary-7f3a",
            args: &[],
            cwd: None,
            env: &HashMap::new(),
            extra_paths: &[],
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
