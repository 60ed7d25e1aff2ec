//! # Events emitted by the supervisor and per-handle background tasks.
//!
//! The [`Event`] struct carries metadata shared by every event (sequence number,
//! timestamp, owning backend) plus an [`EventPayload`], a closed sum type:
//! - **StatusChanged**: a state transition with old/new state and a [`ServerStatus`] snapshot
//! - **LogReceived**: one diagnostic line from a subprocess' standard error
//! - **ToolsUpdated**: the tool list discovered after the handshake
//! - **Error**: a failure that does not (by itself) change the state
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to discard stale updates when consumers keep derived state.
//!
//! ## Example
//! ```rust
//! use mcpvisor::{Event, EventKind, EventPayload};
//!
//! let ev = Event::log("echo-1", "listening on stdio");
//! assert_eq!(ev.kind(), EventKind::LogReceived);
//! assert_eq!(&*ev.server, "echo-1");
//! match &ev.payload {
//!     EventPayload::LogReceived { line } => assert_eq!(line, "listening on stdio"),
//!     _ => unreachable!(),
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::client::Tool;
use crate::core::{RuntimeState, ServerStatus};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification tag of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChanged,
    LogReceived,
    ToolsUpdated,
    Error,
}

impl EventKind {
    /// Stable snake_case name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::StatusChanged => "status_changed",
            EventKind::LogReceived => "log_received",
            EventKind::ToolsUpdated => "tools_updated",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific event data.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// The backend moved from `old` to `new`.
    StatusChanged {
        old: RuntimeState,
        new: RuntimeState,
        status: ServerStatus,
    },
    /// One line of diagnostic output.
    LogReceived { line: String },
    /// Tool discovery finished with this list.
    ToolsUpdated { tools: Arc<[Tool]> },
    /// A non-transition failure (e.g. discovery failed while Running).
    Error {
        message: String,
        cause: Option<String>,
    },
}

/// Runtime event.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp
/// - `server`: owning backend id
#[derive(Debug, Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Backend the event belongs to.
    pub server: Arc<str>,
    /// Variant data.
    pub payload: EventPayload,
}

impl Event {
    /// Creates an event with the current timestamp and the next sequence number.
    pub fn new(server: impl Into<Arc<str>>, payload: EventPayload) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            server: server.into(),
            payload,
        }
    }

    /// Creates a status change event; the backend id is taken from the snapshot.
    #[inline]
    pub fn status_changed(old: RuntimeState, new: RuntimeState, status: ServerStatus) -> Self {
        let server = Arc::clone(&status.id);
        Self::new(server, EventPayload::StatusChanged { old, new, status })
    }

    /// Creates a diagnostic line event.
    #[inline]
    pub fn log(server: impl Into<Arc<str>>, line: impl Into<String>) -> Self {
        Self::new(server, EventPayload::LogReceived { line: line.into() })
    }

    /// Creates a tools-updated event.
    #[inline]
    pub fn tools_updated(server: impl Into<Arc<str>>, tools: Arc<[Tool]>) -> Self {
        Self::new(server, EventPayload::ToolsUpdated { tools })
    }

    /// Creates an error event with an optional cause.
    #[inline]
    pub fn error(
        server: impl Into<Arc<str>>,
        message: impl Into<String>,
        cause: Option<String>,
    ) -> Self {
        Self::new(
            server,
            EventPayload::Error {
                message: message.into(),
                cause,
            },
        )
    }

    /// Returns the event's kind tag.
    pub fn kind(&self) -> EventKind {
        match self.payload {
            EventPayload::StatusChanged { .. } => EventKind::StatusChanged,
            EventPayload::LogReceived { .. } => EventKind::LogReceived,
            EventPayload::ToolsUpdated { .. } => EventKind::ToolsUpdated,
            EventPayload::Error { .. } => EventKind::Error,
        }
    }

    /// Returns `(old, new)` for status changes.
    #[inline]
    pub fn transition(&self) -> Option<(RuntimeState, RuntimeState)> {
        match &self.payload {
            EventPayload::StatusChanged { old, new, .. } => Some((*old, *new)),
            _ => None,
        }
    }

    /// Returns the attached snapshot for status changes.
    #[inline]
    pub fn status(&self) -> Option<&ServerStatus> {
        match &self.payload {
            EventPayload::StatusChanged { status, .. } => Some(status),
            _ => None,
        }
    }
}
