//! # Backend state model.
//!
//! [`RuntimeState`] is the per-handle state machine; [`ServerStatus`] is the immutable
//! snapshot attached to every status event.
//!
//! ## Transitions
//! ```text
//! Idle ──► Starting ──┬─► Running ──┬─► Stopping ──► Stopped
//!             ▲       │             ├─► Crashed
//!             │       │             └─► Error
//!             │       ├─► Error
//!             │       └─► NeedsAuth (streaming auth challenge)
//!             └──────────────┘ (login completed)
//! ```
//! `Stopped`, `Crashed` and `Error` are terminal for a handle instance.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of one backend handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    Crashed,
    NeedsAuth,
}

impl RuntimeState {
    /// `Starting`, `Running` and `Stopping` count as active.
    #[inline]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RuntimeState::Starting | RuntimeState::Running | RuntimeState::Stopping
        )
    }

    /// Terminal states never change again for the same handle.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RuntimeState::Stopped | RuntimeState::Error | RuntimeState::Crashed
        )
    }

    /// Whether the state machine permits `self → next`.
    ///
    /// `Error` is reachable from every non-terminal state; `Stopping` is also
    /// accepted from `Starting`/`NeedsAuth` so an operator can abort a slow start.
    pub fn can_transition_to(self, next: RuntimeState) -> bool {
        use RuntimeState::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Error) => true,
            (Idle, Starting) => true,
            (Starting, Running | NeedsAuth | Stopping | Crashed) => true,
            (NeedsAuth, Starting | Stopping) => true,
            (Running, Stopping | Stopped | Crashed) => true,
            (Stopping, Stopped | Crashed) => true,
            _ => false,
        }
    }

    /// Stable lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            RuntimeState::Idle => "idle",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Stopping => "stopping",
            RuntimeState::Stopped => "stopped",
            RuntimeState::Error => "error",
            RuntimeState::Crashed => "crashed",
            RuntimeState::NeedsAuth => "needs_auth",
        }
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a subprocess terminated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastExit {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Signal name (e.g. `SIGTERM`), when the process was killed by a signal.
    pub signal: Option<String>,
    /// When the exit was observed.
    pub at: DateTime<Utc>,
}

impl LastExit {
    /// Clean exit: code zero, no signal.
    #[inline]
    pub fn is_success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }
}

/// Authentication mode resolved for a streaming backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    #[default]
    None,
    /// Static bearer token from the environment.
    Bearer,
    /// OAuth token available.
    OAuthReady,
    /// OAuth is supported but the operator must log in first.
    OAuthNeedsLogin,
}

/// Which kind of backend a handle supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleKind {
    Subprocess,
    Streaming,
}

/// Immutable status snapshot of one backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerStatus {
    pub id: Arc<str>,
    pub state: RuntimeState,
    pub pid: Option<u32>,
    pub last_exit: Option<LastExit>,
    pub tool_count: usize,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}
