//! # Supervisor configuration.
//!
//! Provides [`SupervisorConfig`], the settings shared by every backend a
//! [`Supervisor`](crate::Supervisor) manages. Per-backend launch parameters live in
//! [`BackendConfig`](crate::BackendConfig).
//!
//! ## Sentinel values
//! - `bus_capacity = 0` → clamped to 1
//! - `handshake_attempts = 0` → clamped to 1 (a handshake is always tried once)
//! - `log_capacity = 0` → clamped to 1
//! - `state_dir = None` → the per-user default, see [`default_state_dir`]

use std::path::PathBuf;
use std::time::Duration;

use crate::events::DEFAULT_BUS_CAPACITY;
use crate::policies::BackoffPolicy;

/// Directory name appended to the platform state directory.
const STATE_SUBDIR: &str = "mcpvisor";

/// Global configuration for the supervisor.
///
/// ## Field semantics
/// - `bus_capacity`: queue depth of the event bus; events beyond it are dropped
/// - `stop_grace`: how long `stop` waits after the graceful terminate signal
/// - `handshake_attempts`: subprocess handshake ceiling (streaming backends try once)
/// - `handshake_backoff`: delay between failed subprocess handshake attempts
/// - `startup_timeout`: per-attempt handshake timeout when a backend sets none
/// - `log_capacity`: diagnostic lines kept per handle, oldest evicted first
/// - `state_dir`: where the identity file lives
/// - `extra_search_paths`: prepended to `PATH` for spawned subprocesses
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub bus_capacity: usize,
    pub stop_grace: Duration,
    pub handshake_attempts: u32,
    pub handshake_backoff: BackoffPolicy,
    pub startup_timeout: Duration,
    pub log_capacity: usize,
    pub state_dir: Option<PathBuf>,
    pub extra_search_paths: Vec<PathBuf>,
}

impl SupervisorConfig {
    /// Bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Handshake attempts clamped to a minimum of 1.
    #[inline]
    pub fn handshake_attempts_clamped(&self) -> u32 {
        self.handshake_attempts.max(1)
    }

    /// Diagnostic ring size clamped to a minimum of 1.
    #[inline]
    pub fn log_capacity_clamped(&self) -> usize {
        self.log_capacity.max(1)
    }

    /// Configured state directory, falling back to [`default_state_dir`].
    pub fn resolved_state_dir(&self) -> Option<PathBuf> {
        self.state_dir.clone().or_else(default_state_dir)
    }
}

impl Default for SupervisorConfig {
    /// Default configuration:
    ///
    /// - `bus_capacity = 100`
    /// - `stop_grace = 5s`
    /// - `handshake_attempts = 3`, `handshake_backoff = 500ms × 2ⁿ` (max 10s)
    /// - `startup_timeout = 30s`
    /// - `log_capacity = 1000`
    fn default() -> Self {
        Self {
            bus_capacity: DEFAULT_BUS_CAPACITY,
            stop_grace: Duration::from_secs(5),
            handshake_attempts: 3,
            handshake_backoff: BackoffPolicy::default(),
            startup_timeout: Duration::from_secs(30),
            log_capacity: 1000,
            state_dir: None,
            extra_search_paths: Vec::new(),
        }
    }
}

/// Per-user state directory: `$XDG_STATE_HOME/mcpvisor` where available, otherwise the
/// local data directory.
pub fn default_state_dir() -> Option<PathBuf> {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .map(|d| d.join(STATE_SUBDIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_clamped() {
        let cfg = SupervisorConfig {
            bus_capacity: 0,
            handshake_attempts: 0,
            log_capacity: 0,
            ..SupervisorConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.handshake_attempts_clamped(), 1);
        assert_eq!(cfg.log_capacity_clamped(), 1);
    }

    #[test]
    fn explicit_state_dir_wins() {
        let cfg = SupervisorConfig {
            state_dir: Some(PathBuf::from("/tmp/visor-state")),
            ..SupervisorConfig::default()
        };
        assert_eq!(
            cfg.resolved_state_dir(),
            Some(PathBuf::from("/tmp/visor-state"))
        );
    }

    #[test]
    fn defaults() {
        let cfg = SupervisorConfig::default();
        assert_eq!(cfg.bus_capacity, 100);
        assert_eq!(cfg.handshake_attempts, 3);
        assert_eq!(cfg.log_capacity, 1000);
        assert_eq!(cfg.stop_grace, Duration::from_secs(5));
    }
}
