//! # LogWriter: events as tracing records
//!
//! Renders every bus [`Event`] through `tracing`, so an operator tool only has to
//! install a `tracing` subscriber to get a readable backend log.
//!
//! ## Example output (with `tracing_subscriber::fmt`)
//! ```text
//! INFO  server="echo-1" old=idle new=starting status changed
//! INFO  server="echo-1" old=starting new=running pid=4242 status changed
//! DEBUG server="echo-1" line="listening on stdio" backend log
//! INFO  server="echo-1" count=3 tools updated
//! WARN  server="echo-1" old=running new=crashed code=Some(1) signal=None status changed
//! ```

use tracing::{debug, info, warn};

use crate::core::RuntimeState;
use crate::events::{Event, EventPayload};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Subscribe for LogWriter {
    fn on_event(&self, e: &Event) {
        match &e.payload {
            EventPayload::StatusChanged { old, new, status } => match new {
                RuntimeState::Crashed | RuntimeState::Error => {
                    let exit = status.last_exit.as_ref();
                    warn!(
                        server = %e.server,
                        %old,
                        %new,
                        code = ?exit.and_then(|x| x.code),
                        signal = ?exit.and_then(|x| x.signal.as_deref()),
                        error = status.error.as_deref().unwrap_or(""),
                        "status changed"
                    );
                }
                _ => {
                    info!(server = %e.server, %old, %new, pid = ?status.pid, "status changed");
                }
            },
            EventPayload::LogReceived { line } => {
                debug!(server = %e.server, %line, "backend log");
            }
            EventPayload::ToolsUpdated { tools } => {
                info!(server = %e.server, count = tools.len(), "tools updated");
            }
            EventPayload::Error { message, cause } => {
                warn!(
                    server = %e.server,
                    %message,
                    cause = cause.as_deref().unwrap_or(""),
                    "backend error"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
