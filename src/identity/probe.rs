//! # OS process probing.
//!
//! [`ProcessProbe`] is the only place that talks to the OS about foreign processes.
//! [`SystemProbe`] has one implementation per target family:
//!
//! | Target       | liveness            | start tick                     | command line              |
//! |--------------|---------------------|--------------------------------|---------------------------|
//! | Linux        | `kill(pid, 0)`      | `/proc/<pid>/stat` field 22    | `/proc/<pid>/cmdline`     |
//! | other unix   | `kill(pid, 0)`      | `ps -o lstart=` (epoch secs)   | `ps -o command=`          |
//! | non-unix     | unsupported         | unsupported                    | unsupported               |
//!
//! Identity decisions stay in [`IdentityTracker`](super::IdentityTracker).

use std::io;

/// Minimal view of the OS process table.
pub trait ProcessProbe: Send + Sync + 'static {
    /// Returns true while `pid` names a live process (zombies included).
    fn is_alive(&self, pid: u32) -> bool;

    /// Returns the OS-reported start instant of `pid`, if obtainable.
    fn start_ticks(&self, pid: u32) -> Option<u64>;

    /// Returns the full command line of `pid`, if obtainable.
    fn command_line(&self, pid: u32) -> Option<String>;

    /// Sends a graceful termination request.
    fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// Probe backed by the running operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

/// pid 0 and anything beyond `i32::MAX` address process groups or nothing at all.
#[cfg(unix)]
fn as_pid(pid: u32) -> Option<nix::unistd::Pid> {
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Some(nix::unistd::Pid::from_raw(raw)),
        _ => None,
    }
}

#[cfg(unix)]
impl ProcessProbe for SystemProbe {
    fn is_alive(&self, pid: u32) -> bool {
        use nix::errno::Errno;
        use nix::sys::signal::kill;

        let Some(pid) = as_pid(pid) else {
            return false;
        };
        match kill(pid, None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn start_ticks(&self, pid: u32) -> Option<u64> {
        as_pid(pid)?;
        platform::start_ticks(pid)
    }

    fn command_line(&self, pid: u32) -> Option<String> {
        as_pid(pid)?;
        platform::command_line(pid)
    }

    fn terminate(&self, pid: u32) -> io::Result<()> {
        use nix::sys::signal::{Signal, kill};

        let target = as_pid(pid).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("invalid pid {pid}"))
        })?;
        kill(target, Signal::SIGTERM).map_err(io::Error::from)
    }
}

#[cfg(not(unix))]
impl ProcessProbe for SystemProbe {
    fn is_alive(&self, _pid: u32) -> bool {
        false
    }

    fn start_ticks(&self, _pid: u32) -> Option<u64> {
        None
    }

    fn command_line(&self, _pid: u32) -> Option<String> {
        None
    }

    fn terminate(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process termination is not supported on this platform",
        ))
    }
}

#[cfg(target_os = "linux")]
mod platform {
    /// Field 22 (`starttime`, clock ticks since boot) of `/proc/<pid>/stat`.
    pub fn start_ticks(pid: u32) -> Option<u64> {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
        parse_stat_start_ticks(&stat)
    }

    pub fn command_line(pid: u32) -> Option<String> {
        let raw = std::fs::read(format!("/proc/{pid}/cmdline")).ok()?;
        let parts: Vec<String> = raw
            .split(|b| *b == 0)
            .filter(|p| !p.is_empty())
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// `comm` (field 2) may contain spaces and parentheses, so fields are counted
    /// from the last `)`; the first token after it is field 3.
    pub fn parse_stat_start_ticks(stat: &str) -> Option<u64> {
        let rest = &stat[stat.rfind(')')? + 1..];
        rest.split_whitespace().nth(22 - 3)?.parse().ok()
    }

}

#[cfg(all(unix, not(target_os = "linux")))]
mod platform {
    use std::process::Command;

    fn ps(pid: u32, field: &str) -> Option<String> {
        let out = Command::new("ps")
            .args(["-o", field, "-p", &pid.to_string()])
            .output()
            .ok()?;
        if !out.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if text.is_empty() { None } else { Some(text) }
    }

    /// `ps` reports the start with one-second resolution; seconds since the epoch
    /// serve as the tick value.
    pub fn start_ticks(pid: u32) -> Option<u64> {
        let raw = ps(pid, "lstart=")?;
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let at = chrono::NaiveDateTime::parse_from_str(&normalized, "%a %b %e %H:%M:%S %Y").ok()?;
        u64::try_from(at.and_utc().timestamp()).ok()
    }

    pub fn command_line(pid: u32) -> Option<String> {
        ps(pid, "command=")
    }
}
