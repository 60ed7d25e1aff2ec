//! # Per-backend handle.
//!
//! A [`Handle`] is the in-memory record of one running or recently stopped backend.
//! It is created by [`Supervisor::start`](crate::Supervisor::start), shared as
//! `Arc<Handle>` with the background tasks that serve it (exit watcher, diagnostic
//! reader, tool discovery), and never reused: a restart builds a fresh one.
//!
//! ## Locking
//! Every mutable field has its own lock so a slow reader of one never blocks
//! another, and unrelated handles never contend:
//! ```text
//! life ─────── Mutex<Life>           state, last exit, error, auth, start time
//! tools ────── RwLock<Arc<[Tool]>>   replaced once by discovery
//! logs ─────── Mutex<VecDeque>       ring of recent stderr lines
//! client ───── Mutex<Option<..>>     protocol client, taken on stop
//! stopped ──── AtomicBool            set once on the first terminal transition
//! tools_ready  watch<bool>           one-shot latch
//! ```
//!
//! Status events are published while `life` is held, so per-handle transitions reach
//! the bus in the order they happened.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::process::ProcessControl;
use super::state::{AuthStatus, HandleKind, LastExit, RuntimeState, ServerStatus};
use crate::client::{ProtocolClient, Tool, Transport};
use crate::config::{BackendConfig, BackendKind};
use crate::events::{Bus, Event};

/// Kind-specific resources. A streaming handle has no process id by construction.
enum Backend {
    Subprocess {
        process: OnceLock<ProcessControl>,
    },
    Streaming {
        url: String,
        transport: Mutex<Option<Arc<dyn Transport>>>,
    },
}

#[derive(Debug)]
struct Life {
    state: RuntimeState,
    last_exit: Option<LastExit>,
    error: Option<String>,
    auth: AuthStatus,
    started_at: Option<DateTime<Utc>>,
}

/// One supervised backend.
pub struct Handle {
    id: Arc<str>,
    config: BackendConfig,
    bus: Bus,
    backend: Backend,
    client: Mutex<Option<Arc<dyn ProtocolClient>>>,
    life: Mutex<Life>,
    tools: RwLock<Arc<[Tool]>>,
    logs: Mutex<VecDeque<String>>,
    log_capacity: usize,
    stopped: AtomicBool,
    stop_requested: AtomicBool,
    tools_ready: watch::Sender<bool>,
    pub(crate) cancel: CancellationToken,
    pub(crate) stop_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id)
            .field("kind", &self.kind())
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Handle {
    pub(crate) fn new(config: BackendConfig, bus: Bus, log_capacity: usize) -> Arc<Self> {
        let backend = match &config.kind {
            BackendKind::Subprocess { .. } => Backend::Subprocess {
                process: OnceLock::new(),
            },
            BackendKind::Streaming { url, .. } => Backend::Streaming {
                url: url.clone(),
                transport: Mutex::new(None),
            },
        };
        let (tools_ready, _) = watch::channel(false);

        Arc::new(Self {
            id: Arc::from(config.id.as_str()),
            config,
            bus,
            backend,
            client: Mutex::new(None),
            life: Mutex::new(Life {
                state: RuntimeState::Idle,
                last_exit: None,
                error: None,
                auth: AuthStatus::None,
                started_at: None,
            }),
            tools: RwLock::new(Arc::from(Vec::new())),
            logs: Mutex::new(VecDeque::new()),
            log_capacity: log_capacity.max(1),
            stopped: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            tools_ready,
            cancel: CancellationToken::new(),
            stop_lock: tokio::sync::Mutex::new(()),
        })
    }

    // ---- read accessors ----

    /// Backend id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Configuration this handle was started from.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Process id, or `0` for streaming backends and not-yet-spawned subprocesses.
    pub fn pid(&self) -> u32 {
        self.process().map(|p| p.pid()).unwrap_or(0)
    }

    /// Endpoint of a streaming backend.
    pub fn url(&self) -> Option<&str> {
        match &self.backend {
            Backend::Streaming { url, .. } => Some(url),
            Backend::Subprocess { .. } => None,
        }
    }

    pub fn kind(&self) -> HandleKind {
        match self.backend {
            Backend::Subprocess { .. } => HandleKind::Subprocess,
            Backend::Streaming { .. } => HandleKind::Streaming,
        }
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.life().auth
    }

    pub fn state(&self) -> RuntimeState {
        self.life().state
    }

    /// Tools found by the most recent discovery (empty until it finishes).
    pub fn tools(&self) -> Arc<[Tool]> {
        Arc::clone(&self.tools.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Recent diagnostic lines, oldest first.
    pub fn logs(&self) -> Vec<String> {
        self.logs_guard().iter().cloned().collect()
    }

    /// Time since the backend started, zero if it never did.
    pub fn uptime(&self) -> Duration {
        self.life()
            .started_at
            .and_then(|t| (Utc::now() - t).to_std().ok())
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.state() == RuntimeState::Running && !self.is_stopped()
    }

    /// True once the handle reached a terminal state; never reverts.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Current status snapshot.
    pub fn status(&self) -> ServerStatus {
        let life = self.life();
        self.snapshot(&life)
    }

    /// Waits until background tool discovery has finished or was aborted.
    pub async fn wait_tools_ready(&self) {
        let mut rx = self.tools_ready.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Whether the tools-ready latch has fired.
    pub fn tools_ready(&self) -> bool {
        *self.tools_ready.borrow()
    }

    // ---- crate-internal mutation ----

    pub(crate) fn bus(&self) -> &Bus {
        &self.bus
    }

    pub(crate) fn process(&self) -> Option<&ProcessControl> {
        match &self.backend {
            Backend::Subprocess { process } => process.get(),
            Backend::Streaming { .. } => None,
        }
    }

    pub(crate) fn attach_process(&self, control: ProcessControl) {
        if let Backend::Subprocess { process } = &self.backend {
            if process.set(control).is_err() {
                warn!(server = %self.id, "process already attached; ignoring");
            }
        }
    }

    pub(crate) fn set_transport(&self, t: Arc<dyn Transport>) {
        if let Backend::Streaming { transport, .. } = &self.backend {
            *transport.lock().unwrap_or_else(|e| e.into_inner()) = Some(t);
        }
    }

    pub(crate) fn take_transport(&self) -> Option<Arc<dyn Transport>> {
        match &self.backend {
            Backend::Streaming { transport, .. } => {
                transport.lock().unwrap_or_else(|e| e.into_inner()).take()
            }
            Backend::Subprocess { .. } => None,
        }
    }

    pub(crate) fn set_client(&self, client: Arc<dyn ProtocolClient>) {
        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);
    }

    pub(crate) fn take_client(&self) -> Option<Arc<dyn ProtocolClient>> {
        self.client.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub(crate) fn set_auth(&self, auth: AuthStatus) {
        self.life().auth = auth;
    }

    pub(crate) fn mark_stop_requested(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub(crate) fn set_tools(&self, tools: Vec<Tool>) -> Arc<[Tool]> {
        let tools: Arc<[Tool]> = Arc::from(tools);
        *self.tools.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&tools);
        tools
    }

    /// Fires the tools-ready latch; later calls are no-ops.
    pub(crate) fn mark_tools_ready(&self) {
        self.tools_ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
    }

    /// Appends a diagnostic line, evicting the oldest past capacity.
    pub(crate) fn push_log(&self, line: String) {
        let mut logs = self.logs_guard();
        while logs.len() >= self.log_capacity {
            logs.pop_front();
        }
        logs.push_back(line);
    }

    /// Moves to `next` and publishes the change.
    ///
    /// Returns false (and publishes nothing) when the state machine forbids the
    /// move, which is how racing terminal publishers collapse to exactly one.
    pub(crate) fn transition(&self, next: RuntimeState) -> bool {
        self.transition_with(next, |_| {})
    }

    /// Moves to `Error` with a readable message.
    pub(crate) fn fail(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        self.transition_with(RuntimeState::Error, move |life| life.error = Some(message))
    }

    /// Records how the process ended and moves to the matching terminal state.
    pub(crate) fn record_exit(
        &self,
        exit: LastExit,
        next: RuntimeState,
        error: Option<String>,
    ) -> bool {
        self.transition_with(next, move |life| {
            life.last_exit = Some(exit);
            if error.is_some() {
                life.error = error;
            }
        })
    }

    fn transition_with(&self, next: RuntimeState, apply: impl FnOnce(&mut Life)) -> bool {
        let mut life = self.life();
        let old = life.state;
        if !old.can_transition_to(next) {
            debug!(server = %self.id, from = %old, to = %next, "transition ignored");
            return false;
        }
        if next.is_terminal() && self.stopped.swap(true, Ordering::AcqRel) {
            return false;
        }

        life.state = next;
        if next == RuntimeState::Starting && life.started_at.is_none() {
            life.started_at = Some(Utc::now());
        }
        apply(&mut life);

        match next {
            RuntimeState::Error | RuntimeState::Crashed => {
                warn!(server = %self.id, from = %old, to = %next, error = ?life.error, "backend state changed")
            }
            _ => info!(server = %self.id, from = %old, to = %next, "backend state changed"),
        }
        let status = self.snapshot(&life);
        self.bus.publish(Event::status_changed(old, next, status));
        true
    }

    fn snapshot(&self, life: &Life) -> ServerStatus {
        let pid = self.pid();
        ServerStatus {
            id: Arc::clone(&self.id),
            state: life.state,
            pid: (pid != 0).then_some(pid),
            last_exit: life.last_exit.clone(),
            tool_count: self.tools.read().unwrap_or_else(|e| e.into_inner()).len(),
            error: life.error.clone(),
            started_at: life.started_at,
        }
    }

    fn life(&self) -> MutexGuard<'_, Life> {
        self.life.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn logs_guard(&self) -> MutexGuard<'_, VecDeque<String>> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
