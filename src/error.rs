//! Error types used by the supervisor, its collaborators and the identity tracker.
//!
//! This module defines the main error enums:
//!
//! - [`SupervisorError`] errors returned by [`Supervisor`](crate::Supervisor) operations.
//! - [`ClientError`] errors reported by external protocol clients, transports and OAuth collaborators.
//! - [`TrackerError`] errors raised while persisting process identity.
//!
//! Every enum provides `as_label` for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by supervisor operations.
///
/// Each failing `start` also publishes an `Error`-classified status change on the bus,
/// so the synchronous error and the event stream always agree.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A backend with the same name is still active.
    #[error("backend {name:?} is already running")]
    AlreadyRunning {
        /// Backend name.
        name: String,
    },

    /// No backend with this name is tracked.
    #[error("backend {name:?} not found")]
    NotFound {
        /// Backend name.
        name: String,
    },

    /// The subprocess could not be spawned.
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        /// Executable that failed to launch.
        command: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The protocol channel could not be opened.
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Remote URL, or the command for a stdio channel.
        endpoint: String,
        /// Underlying client error.
        #[source]
        source: ClientError,
    },

    /// Protocol handshake failed (after all permitted attempts).
    #[error("handshake failed after {attempts} attempt(s): {source}")]
    Handshake {
        /// Number of attempts made.
        attempts: u32,
        /// Error from the last attempt.
        #[source]
        source: ClientError,
    },

    /// The backend was stopped or exited before reaching `Running`.
    #[error("backend {name:?} left startup early (now {state})")]
    Aborted {
        /// Backend name.
        name: String,
        /// State observed when startup gave up.
        state: crate::core::RuntimeState,
    },

    /// `authenticate` was called on a backend that is not waiting for login.
    #[error("backend {name:?} is not waiting for authentication")]
    NotAwaitingAuth {
        /// Backend name.
        name: String,
    },

    /// The OAuth login flow failed or no OAuth collaborator is configured.
    #[error("authentication failed for {name:?}: {reason}")]
    Auth {
        /// Backend name.
        name: String,
        /// Human-readable cause.
        reason: String,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use mcpvisor::SupervisorError;
    ///
    /// let err = SupervisorError::NotFound { name: "echo".into() };
    /// assert_eq!(err.as_label(), "backend_not_found");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::AlreadyRunning { .. } => "backend_already_running",
            SupervisorError::NotFound { .. } => "backend_not_found",
            SupervisorError::Spawn { .. } => "backend_spawn_failed",
            SupervisorError::Connect { .. } => "backend_connect_failed",
            SupervisorError::Handshake { .. } => "backend_handshake_failed",
            SupervisorError::Aborted { .. } => "backend_start_aborted",
            SupervisorError::NotAwaitingAuth { .. } => "backend_not_awaiting_auth",
            SupervisorError::Auth { .. } => "backend_auth_failed",
        }
    }
}

/// # Errors reported by external collaborators.
///
/// The supervisor never inspects wire details; it only needs to know whether a failure
/// is an authentication challenge (which leads to `NeedsAuth`) or anything else.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// The remote side demanded authentication.
    #[error("unauthorized{}", challenge.as_deref().map(|c| format!(": {c}")).unwrap_or_default())]
    Unauthorized {
        /// Raw challenge (e.g. a `WWW-Authenticate` header value), if any.
        challenge: Option<String>,
    },

    /// Transport-level failure (I/O, HTTP, broken pipe).
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer replied with something the client could not accept.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The client or transport has been closed.
    #[error("closed")]
    Closed,
}

impl ClientError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ClientError::Unauthorized { .. } => "client_unauthorized",
            ClientError::Transport(_) => "client_transport",
            ClientError::Protocol(_) => "client_protocol",
            ClientError::Timeout(_) => "client_timeout",
            ClientError::Closed => "client_closed",
        }
    }

    /// Indicates whether the peer asked for credentials.
    ///
    /// # Example
    /// ```
    /// use mcpvisor::ClientError;
    ///
    /// assert!(ClientError::Unauthorized { challenge: None }.is_auth_challenge());
    /// assert!(!ClientError::Closed.is_auth_challenge());
    /// ```
    pub fn is_auth_challenge(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }
}

/// # Errors raised by the identity tracker.
///
/// Never escalated to supervisor callers: the supervisor logs them and carries on.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Reading, writing or renaming the state file failed.
    #[error("identity file i/o: {0}")]
    Io(#[from] std::io::Error),

    /// The identity map could not be serialized.
    #[error("identity file encoding: {0}")]
    Serde(#[from] serde_json::Error),

    /// No per-user state directory could be determined.
    #[error("no state directory available")]
    NoStateDir,
}

impl TrackerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TrackerError::Io(_) => "tracker_io",
            TrackerError::Serde(_) => "tracker_serde",
            TrackerError::NoStateDir => "tracker_no_state_dir",
        }
    }
}
