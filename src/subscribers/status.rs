//! # Latest-status board with sequence-based ordering.
//!
//! Keeps the most recent [`ServerStatus`] per backend by listening to status changes,
//! using event sequence numbers to ignore stale updates.
//!
//! ## Architecture
//! ```text
//! Supervisor ──► Bus ──► Dispatcher ──► StatusBoard::update()
//!                                              │
//!                                              ▼
//!                                   HashMap<String, Entry>
//!                                  (id → {last_seq, status})
//! ```
//!
//! ## Rules
//! - Only `StatusChanged` events replace the stored snapshot
//! - `ToolsUpdated` refreshes the tool count of a known backend
//! - Events with `seq <= last_seq` are **rejected** (stale)

use std::collections::HashMap;
use std::sync::RwLock;

use crate::core::ServerStatus;
use crate::events::{Event, EventPayload};
use crate::subscribers::Subscribe;

#[derive(Debug, Clone)]
struct Entry {
    last_seq: u64,
    status: ServerStatus,
}

/// Thread-safe table of the latest status per backend.
///
/// A UI can render straight from [`snapshot`](Self::snapshot) without talking to the supervisor.
#[derive(Default)]
pub struct StatusBoard {
    state: RwLock<HashMap<String, Entry>>,
}

impl StatusBoard {
    /// Creates a new empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an event if it is newer than what the board has seen for that backend.
    ///
    /// Returns true when the stored status changed.
    pub fn update(&self, ev: &Event) -> bool {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match &ev.payload {
            EventPayload::StatusChanged { status, .. } => {
                match state.get_mut(&*ev.server) {
                    Some(entry) if ev.seq <= entry.last_seq => false,
                    Some(entry) => {
                        entry.last_seq = ev.seq;
                        entry.status = status.clone();
                        true
                    }
                    None => {
                        state.insert(
                            ev.server.to_string(),
                            Entry {
                                last_seq: ev.seq,
                                status: status.clone(),
                            },
                        );
                        true
                    }
                }
            }
            EventPayload::ToolsUpdated { tools } => match state.get_mut(&*ev.server) {
                Some(entry) if ev.seq > entry.last_seq => {
                    entry.last_seq = ev.seq;
                    entry.status.tool_count = tools.len();
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }

    /// Returns the latest status of one backend.
    pub fn get(&self, id: &str) -> Option<ServerStatus> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|e| e.status.clone())
    }

    /// Returns all known statuses sorted by backend id.
    pub fn snapshot(&self) -> Vec<ServerStatus> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<ServerStatus> = state.values().map(|e| e.status.clone()).collect();
        all.sort_unstable_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Returns sorted ids of backends currently in an active state.
    pub fn active(&self) -> Vec<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = state
            .iter()
            .filter(|(_, e)| e.status.state.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Subscribe for StatusBoard {
    fn on_event(&self, event: &Event) {
        self.update(event);
    }

    fn name(&self) -> &'static str {
        "StatusBoard"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RuntimeState;
    use std::sync::Arc;

    fn changed(id: &str, old: RuntimeState, new: RuntimeState) -> Event {
        Event::status_changed(
            old,
            new,
            ServerStatus {
                id: id.into(),
                state: new,
                pid: None,
                last_exit: None,
                tool_count: 0,
                error: None,
                started_at: None,
            },
        )
    }

    #[test]
    fn stale_events_are_rejected() {
        let board = StatusBoard::new();
        let starting = changed("a", RuntimeState::Idle, RuntimeState::Starting);
        let running = changed("a", RuntimeState::Starting, RuntimeState::Running);

        assert!(board.update(&running));
        assert!(!board.update(&starting));
        assert_eq!(board.get("a").map(|s| s.state), Some(RuntimeState::Running));
        assert_eq!(board.active(), vec!["a".to_string()]);
    }

    #[test]
    fn tools_update_known_backends_only() {
        let board = StatusBoard::new();
        let tools: Arc<[crate::client::Tool]> = Arc::from(vec![crate::client::Tool::new("echo")]);
        assert!(!board.update(&Event::tools_updated("ghost", tools.clone())));

        board.update(&changed("a", RuntimeState::Starting, RuntimeState::Running));
        assert!(board.update(&Event::tools_updated("a", tools)));
        assert_eq!(board.get("a").map(|s| s.tool_count), Some(1));
        assert!(board.get("ghost").is_none());
    }

    #[test]
    fn snapshot_is_sorted() {
        let board = StatusBoard::new();
        board.update(&changed("b", RuntimeState::Idle, RuntimeState::Starting));
        board.update(&changed("a", RuntimeState::Running, RuntimeState::Crashed));
        let ids: Vec<String> = board.snapshot().iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(board.active(), vec!["b".to_string()]);
    }
}
