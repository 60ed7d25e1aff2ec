//! # Persistent process identity tracker.
//!
//! Remembers which subprocesses this operator process launched, so that a later
//! run can clean up children orphaned by a crash, without ever killing a process
//! that merely inherited a recycled PID.
//!
//! ## Architecture
//! ```text
//! Supervisor::start ──► add(name, pid, cmd, args) ──┐
//! Supervisor::stop  ──► remove(name, pid) ──────────┼──► Mutex<Table> ──► <state_dir>/processes.json
//! startup           ──► cleanup_orphans() ──────────┘        (temp file + rename, 0600)
//!                              │
//!                              ▼
//!                    classify(entry) via ProcessProbe
//!                    ├─ Gone      → discard
//!                    ├─ Reused    → discard, never signal
//!                    ├─ Owned     → SIGTERM, discard
//!                    └─ Uncertain → retry_count += 1, discard at ceiling
//! ```
//!
//! ## Rules
//! - A recorded start tick that matches the live one is sufficient proof of ownership,
//!   even if the command line differs (interpreter wrappers rewrite argv).
//! - Without a usable tick, a live command line containing the recorded command or
//!   arguments counts as ownership; anything else is uncertain.
//! - Ambiguity errs towards leaving a live process alone.
//! - Entries added by this tracker instance belong to live supervised backends and are
//!   never swept; only entries inherited from the file are orphan candidates.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::probe::{ProcessProbe, SystemProbe};
use crate::error::TrackerError;

/// Name of the identity file inside the state directory.
pub const IDENTITY_FILE: &str = "processes.json";

/// Cleanup passes an unverifiable entry survives before it is dropped.
pub const MAX_UNVERIFIED_PASSES: u32 = 3;

/// Persisted identity of one launched subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityEntry {
    pub pid: u32,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub started_at: DateTime<Utc>,
    /// OS start tick captured at spawn; `0` when none could be read.
    #[serde(default)]
    pub process_start_ticks: i64,
    #[serde(default)]
    pub retry_count: u32,
}

impl IdentityEntry {
    fn recorded_ticks(&self) -> Option<u64> {
        u64::try_from(self.process_start_ticks)
            .ok()
            .filter(|t| *t > 0)
    }

    fn matches_command_line(&self, cmdline: &str) -> bool {
        (!self.command.is_empty() && cmdline.contains(&self.command))
            || (!self.args.is_empty() && cmdline.contains(&self.args.join(" ")))
    }
}

/// Outcome of examining one entry during cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The PID is no longer live.
    Gone,
    /// The PID is live but belongs to an unrelated process.
    Reused,
    /// The PID is still our child.
    Owned,
    /// The PID is live and ownership cannot be established.
    Uncertain,
}

/// Thread-safe, disk-backed map of backend name → [`IdentityEntry`].
///
/// ### Rules
/// - Every mutation rewrites the whole file atomically.
/// - Mutation and cleanup serialize behind one lock.
/// - A missing or malformed file loads as empty.
pub struct IdentityTracker {
    path: PathBuf,
    table: Mutex<Table>,
    probe: Arc<dyn ProcessProbe>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, IdentityEntry>,
    /// Names recorded through `add` during this lifetime.
    launched: HashSet<String>,
}

impl std::fmt::Debug for IdentityTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityTracker")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl IdentityTracker {
    /// Opens (or creates) the tracker in `state_dir`, probing the real OS.
    pub fn open(state_dir: impl AsRef<Path>) -> Result<Self, TrackerError> {
        Self::with_probe(state_dir, Arc::new(SystemProbe))
    }

    /// Opens the tracker in the default per-user state directory.
    pub fn open_default() -> Result<Self, TrackerError> {
        let dir = crate::core::default_state_dir().ok_or(TrackerError::NoStateDir)?;
        Self::open(dir)
    }

    /// Opens the tracker with a custom probe.
    pub fn with_probe(
        state_dir: impl AsRef<Path>,
        probe: Arc<dyn ProcessProbe>,
    ) -> Result<Self, TrackerError> {
        let dir = state_dir.as_ref();
        fs::create_dir_all(dir)?;
        restrict_dir(dir)?;

        let path = dir.join(IDENTITY_FILE);
        let entries = load(&path);
        debug!(path = %path.display(), entries = entries.len(), "identity tracker opened");
        Ok(Self {
            path,
            table: Mutex::new(Table {
                entries,
                launched: HashSet::new(),
            }),
            probe,
        })
    }

    /// Path of the identity file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records a freshly spawned subprocess, capturing its start tick now.
    pub fn add(
        &self,
        name: &str,
        pid: u32,
        command: &str,
        args: &[String],
    ) -> Result<(), TrackerError> {
        let ticks = self
            .probe
            .start_ticks(pid)
            .and_then(|t| i64::try_from(t).ok())
            .unwrap_or(0);
        if ticks == 0 {
            warn!(server = name, pid, "no start tick available; orphan checks will rely on the command line");
        }
        let entry = IdentityEntry {
            pid,
            command: command.to_string(),
            args: args.to_vec(),
            started_at: Utc::now(),
            process_start_ticks: ticks,
            retry_count: 0,
        };

        let mut table = self.lock();
        table.entries.insert(name.to_string(), entry);
        table.launched.insert(name.to_string());
        self.persist(&table.entries)
    }

    /// Forgets a backend after a clean stop.
    ///
    /// Only an entry still recording `pid` is removed, so a stale stop cannot erase
    /// the identity of a newer process launched under the same name. Unknown names
    /// and mismatched pids are ignored.
    pub fn remove(&self, name: &str, pid: u32) -> Result<(), TrackerError> {
        let mut table = self.lock();
        if table.entries.get(name).is_none_or(|e| e.pid != pid) {
            debug!(server = name, pid, "identity entry absent or newer; keeping it");
            return Ok(());
        }
        table.entries.remove(name);
        table.launched.remove(name);
        self.persist(&table.entries)
    }

    /// Returns a copy of the current entries.
    pub fn entries(&self) -> HashMap<String, IdentityEntry> {
        self.lock().entries.clone()
    }

    /// Classifies one entry against the live process table.
    pub fn classify(&self, entry: &IdentityEntry) -> Verdict {
        if !self.probe.is_alive(entry.pid) {
            return Verdict::Gone;
        }
        if let (Some(recorded), Some(current)) =
            (entry.recorded_ticks(), self.probe.start_ticks(entry.pid))
        {
            return if recorded == current {
                Verdict::Owned
            } else {
                Verdict::Reused
            };
        }
        match self.probe.command_line(entry.pid) {
            Some(cmdline) if entry.matches_command_line(&cmdline) => Verdict::Owned,
            _ => Verdict::Uncertain,
        }
    }

    /// Examines every inherited entry once and terminates verified orphans.
    ///
    /// Entries recorded by this instance through [`add`](Self::add) are skipped, so
    /// calling this while backends run never signals them.
    /// Returns the number of processes that were sent a termination signal.
    pub fn cleanup_orphans(&self) -> usize {
        let mut table = self.lock();
        let Table { entries, launched } = &mut *table;
        if entries.is_empty() {
            return 0;
        }

        let mut killed = 0;
        let mut changed = false;
        let names: Vec<String> = entries
            .keys()
            .filter(|name| !launched.contains(*name))
            .cloned()
            .collect();

        for name in names {
            let Some(entry) = entries.get_mut(&name) else {
                continue;
            };
            let verdict = self.classify(entry);
            let pid = entry.pid;

            let discard = match verdict {
                Verdict::Gone => {
                    debug!(server = %name, pid, "orphan entry: process gone");
                    true
                }
                Verdict::Reused => {
                    info!(server = %name, pid, "orphan entry: pid reused by another process; leaving it alone");
                    true
                }
                Verdict::Owned => {
                    match self.probe.terminate(pid) {
                        Ok(()) => {
                            killed += 1;
                            info!(server = %name, pid, command = %entry.command, "terminated orphaned backend");
                        }
                        Err(e) => {
                            warn!(server = %name, pid, error = %e, "failed to terminate orphaned backend");
                        }
                    }
                    true
                }
                Verdict::Uncertain => {
                    entry.retry_count += 1;
                    if entry.retry_count >= MAX_UNVERIFIED_PASSES {
                        warn!(
                            server = %name,
                            pid,
                            passes = entry.retry_count,
                            "orphan entry could not be verified; discarding without kill"
                        );
                        true
                    } else {
                        debug!(server = %name, pid, passes = entry.retry_count, "orphan entry unverifiable; will retry next startup");
                        changed = true;
                        false
                    }
                }
            };

            if discard {
                entries.remove(&name);
                changed = true;
            }
        }

        if changed {
            if let Err(e) = self.persist(entries) {
                warn!(error = %e, label = e.as_label(), "failed to persist identity file after cleanup");
            }
        }
        killed
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, entries: &HashMap<String, IdentityEntry>) -> Result<(), TrackerError> {
        let data = serde_json::to_vec_pretty(entries)?;
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| TrackerError::Io(e.error))?;
        Ok(())
    }
}

fn load(path: &Path) -> HashMap<String, IdentityEntry> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "identity file unreadable; starting empty");
            return HashMap::new();
        }
    };
    match serde_json::from_slice(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "identity file malformed; starting empty");
            HashMap::new()
        }
    }
}

#[cfg(unix)]
fn restrict_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn restrict_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}
