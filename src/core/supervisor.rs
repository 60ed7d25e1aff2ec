//! # Supervisor: owns backend handles and drives their lifecycles.
//!
//! The [`Supervisor`] keeps a name → [`Handle`] map behind one reader/writer lock,
//! spawns or connects backends, runs the protocol handshake through the external
//! [`Connector`], and publishes every state change on the [`Bus`].
//!
//! ## Architecture
//! ```text
//! start(cfg) ──► write lock: reject active name, insert Handle, publish Starting
//!     │
//!     ├─ subprocess: spawn ─► exit watcher + stderr reader ─► tracker.add
//!     │              └─► Connector::stdio ─► handshake (retries, backoff)
//!     │
//!     ├─ streaming:  resolve auth ─┬─► NeedsAuth (login required)        ◄── authenticate()
//!     │                            └─► Connector::http ─► handshake (once)
//!     │                                      └─► auth challenge ─► NeedsAuth
//!     ▼
//!  Running ──► tool discovery (background) ─► ToolsUpdated | Error event
//!
//! stop(name) ──► Stopping ─► cancel ─► close client ─┬─► SIGTERM ─► grace ─► SIGKILL
//!                                                    └─► close transport
//!            ──► Stopped (exit watcher or stop, exactly once) ─► tracker.remove
//! ```
//!
//! ## Rules
//! - Check-and-insert happens under the write lock, so two concurrent starts of one
//!   name cannot both succeed.
//! - No supervisor lock is held across an `.await` on a backend.
//! - Every failed start publishes an `Error` status change and returns the error.
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcpvisor::{BackendConfig, Connector, Supervisor, SupervisorConfig};
//!
//! async fn run(connector: Arc<dyn Connector>) -> Result<(), Box<dyn std::error::Error>> {
//!     let sup = Supervisor::builder(SupervisorConfig::default(), connector).build();
//!     sup.recover_orphans().await;
//!
//!     let handle = sup
//!         .start(BackendConfig::subprocess("files", "npx", ["-y", "files-server"]))
//!         .await?;
//!     handle.wait_tools_ready().await;
//!     println!("{} tools", handle.tools().len());
//!
//!     sup.stop_all().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::builder::SupervisorBuilder;
use super::config::SupervisorConfig;
use super::discovery::spawn_discovery;
use super::handle::Handle;
use super::handshake::{HandshakePlan, handshake};
use super::process::{self, Launch, Spawned};
use super::shutdown;
use super::state::{AuthStatus, HandleKind, RuntimeState};
use super::streaming::{self, AuthPlan};
use crate::client::{Connector, HttpAuth, OAuthProvider, ProtocolClient};
use crate::config::{BackendConfig, BackendKind};
use crate::error::{ClientError, SupervisorError};
use crate::events::{Bus, Event, Unsubscribe};
use crate::identity::IdentityTracker;

/// Extra wait after SIGKILL before `stop` gives up on observing the exit.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Coordinates backend handles, the identity tracker and event publishing.
pub struct Supervisor {
    cfg: SupervisorConfig,
    bus: Bus,
    handles: RwLock<HashMap<String, Arc<Handle>>>,
    connector: Arc<dyn Connector>,
    oauth: Option<Arc<dyn OAuthProvider>>,
    tracker: Option<Arc<IdentityTracker>>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("bus", &self.bus)
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Returns a builder; `connector` builds protocol clients for both backend kinds.
    pub fn builder(cfg: SupervisorConfig, connector: Arc<dyn Connector>) -> SupervisorBuilder {
        SupervisorBuilder::new(cfg, connector)
    }

    pub(crate) fn new_internal(
        cfg: SupervisorConfig,
        bus: Bus,
        connector: Arc<dyn Connector>,
        oauth: Option<Arc<dyn OAuthProvider>>,
        tracker: Option<Arc<IdentityTracker>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            handles: RwLock::new(HashMap::new()),
            connector,
            oauth,
            tracker,
        }
    }

    /// Event bus all handles publish to.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.cfg
    }

    /// Shorthand for [`Bus::subscribe`].
    pub fn subscribe<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.subscribe(handler)
    }

    // ---- lookups ----

    /// Handle registered under `name`, including failed or crashed ones.
    pub async fn get(&self, name: &str) -> Option<Arc<Handle>> {
        self.handles.read().await.get(name).cloned()
    }

    /// Number of backends currently `Running`.
    pub async fn running_count(&self) -> usize {
        self.handles
            .read()
            .await
            .values()
            .filter(|h| h.is_running())
            .count()
    }

    /// Sorted names of backends currently `Running`.
    pub async fn running_names(&self) -> Vec<String> {
        let handles = self.handles.read().await;
        let mut names: Vec<String> = handles
            .iter()
            .filter(|(_, h)| h.is_running())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    // ---- start ----

    /// Starts the backend described by `config` under `config.id`.
    ///
    /// Returns once the backend is `Running` (tool discovery continues in the
    /// background) or, for a streaming backend that must log in first, `NeedsAuth`.
    ///
    /// ### Errors
    /// - [`SupervisorError::AlreadyRunning`] if the name is active or awaiting login;
    ///   the existing handle is untouched.
    /// - spawn, connect and handshake failures, after the handle moved to `Error`.
    pub async fn start(&self, config: BackendConfig) -> Result<Arc<Handle>, SupervisorError> {
        let handle = self.register(config).await?;

        let result = match &handle.config().kind {
            BackendKind::Subprocess {
                command,
                args,
                cwd,
                env,
            } => {
                let launch = Launch {
                    command,
                    args,
                    cwd: cwd.as_deref(),
                    env,
                    extra_paths: &self.cfg.extra_search_paths,
                };
                self.start_subprocess(&handle, launch).await
            }
            BackendKind::Streaming {
                url,
                headers,
                bearer_env,
                ..
            } => {
                match streaming::resolve_auth(
                    handle.id(),
                    url,
                    bearer_env.as_deref(),
                    self.oauth.as_ref(),
                )
                .await
                {
                    AuthPlan::NeedsLogin => {
                        self.park_for_login(&handle);
                        Ok(())
                    }
                    AuthPlan::Connect(auth, status) => {
                        self.connect_streaming(&handle, url, headers, auth, status)
                            .await
                    }
                }
            }
        };

        match result {
            Ok(()) => Ok(handle),
            Err(err) => {
                self.abort_start(&handle, &err).await;
                Err(err)
            }
        }
    }

    /// Check-and-insert under the write lock; publishes `Starting`.
    async fn register(&self, config: BackendConfig) -> Result<Arc<Handle>, SupervisorError> {
        let mut handles = self.handles.write().await;
        if let Some(existing) = handles.get(&config.id) {
            let state = existing.state();
            if state.is_active() || state == RuntimeState::NeedsAuth {
                debug!(server = %config.id, %state, "start rejected: backend already active");
                return Err(SupervisorError::AlreadyRunning { name: config.id });
            }
        }

        let handle = Handle::new(config, self.bus.clone(), self.cfg.log_capacity_clamped());
        handle.transition(RuntimeState::Starting);
        handles.insert(handle.id().to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    async fn start_subprocess(
        &self,
        handle: &Arc<Handle>,
        launch: Launch<'_>,
    ) -> Result<(), SupervisorError> {
        let Spawned {
            child,
            pipes,
            stderr,
            pid,
        } = process::spawn(&launch).map_err(|source| SupervisorError::Spawn {
            command: launch.command.to_string(),
            source,
        })?;
        info!(server = %handle.id(), pid, command = launch.command, "backend spawned");

        handle.attach_process(process::watch_exit(Arc::clone(handle), child, pid));
        process::read_diagnostics(Arc::clone(handle), stderr);
        self.track(handle.id(), pid, launch.command, launch.args)
            .await;

        let client = self
            .connector
            .stdio(pipes)
            .map_err(|source| SupervisorError::Connect {
                endpoint: launch.command.to_string(),
                source,
            })?;
        handle.set_client(Arc::clone(&client));

        let plan = HandshakePlan {
            attempts: self.cfg.handshake_attempts_clamped(),
            backoff: self.cfg.handshake_backoff,
            per_attempt: self.startup_timeout(handle),
        };
        handshake(handle.id(), client.as_ref(), plan, &handle.cancel)
            .await
            .map_err(|f| SupervisorError::Handshake {
                attempts: f.attempts,
                source: f.error,
            })?;

        self.go_running(handle, client)
    }

    async fn connect_streaming(
        &self,
        handle: &Arc<Handle>,
        url: &str,
        headers: &HashMap<String, String>,
        auth: HttpAuth,
        status: AuthStatus,
    ) -> Result<(), SupervisorError> {
        handle.set_auth(status);

        let conn = match streaming::connect(self.connector.as_ref(), url, auth, headers).await {
            Ok(conn) => conn,
            Err(e) => {
                if self.challenge_needs_login(handle, url, &e).await {
                    return Ok(());
                }
                return Err(SupervisorError::Connect {
                    endpoint: url.to_string(),
                    source: e,
                });
            }
        };
        handle.set_transport(Arc::clone(&conn.transport));
        handle.set_client(Arc::clone(&conn.client));

        let plan = HandshakePlan {
            attempts: 1,
            backoff: self.cfg.handshake_backoff,
            per_attempt: self.startup_timeout(handle),
        };
        if let Err(f) = handshake(handle.id(), conn.client.as_ref(), plan, &handle.cancel).await {
            if self.challenge_needs_login(handle, url, &f.error).await {
                self.release_channel(handle).await;
                return Ok(());
            }
            return Err(SupervisorError::Handshake {
                attempts: f.attempts,
                source: f.error,
            });
        }

        self.go_running(handle, conn.client)
    }

    async fn challenge_needs_login(&self, handle: &Handle, url: &str, error: &ClientError) -> bool {
        if !streaming::challenge_needs_login(handle.id(), url, error, self.oauth.as_ref()).await {
            return false;
        }
        self.park_for_login(handle);
        true
    }

    fn park_for_login(&self, handle: &Handle) {
        handle.set_auth(AuthStatus::OAuthNeedsLogin);
        handle.transition(RuntimeState::NeedsAuth);
    }

    fn go_running(
        &self,
        handle: &Arc<Handle>,
        client: Arc<dyn ProtocolClient>,
    ) -> Result<(), SupervisorError> {
        if !handle.transition(RuntimeState::Running) {
            return Err(SupervisorError::Aborted {
                name: handle.id().to_string(),
                state: handle.state(),
            });
        }
        spawn_discovery(Arc::clone(handle), client, self.startup_timeout(handle));
        Ok(())
    }

    /// Moves a failed start to `Error` and releases whatever it acquired.
    async fn abort_start(&self, handle: &Arc<Handle>, err: &SupervisorError) {
        warn!(server = %handle.id(), error = %err, label = err.as_label(), "backend start failed");
        // A concurrent stop owns the terminal transition.
        if !handle.stop_requested() {
            handle.fail(err.to_string());
        }
        handle.cancel.cancel();
        self.release_channel(handle).await;
        self.terminate_process(handle).await;
        if handle.pid() != 0 {
            self.untrack(handle.id(), handle.pid()).await;
        }
        handle.mark_tools_ready();
    }

    fn startup_timeout(&self, handle: &Handle) -> Duration {
        handle
            .config()
            .startup_timeout
            .unwrap_or(self.cfg.startup_timeout)
    }

    // ---- login ----

    /// Runs the OAuth login flow for a backend waiting in `NeedsAuth`, then
    /// reconnects it (`NeedsAuth → Starting → Running`).
    pub async fn authenticate(&self, name: &str) -> Result<Arc<Handle>, SupervisorError> {
        let handle = self
            .get(name)
            .await
            .ok_or_else(|| SupervisorError::NotFound {
                name: name.to_string(),
            })?;
        let not_awaiting = || SupervisorError::NotAwaitingAuth {
            name: name.to_string(),
        };

        let BackendKind::Streaming {
            url,
            headers,
            scopes,
            ..
        } = &handle.config().kind
        else {
            return Err(not_awaiting());
        };
        if handle.state() != RuntimeState::NeedsAuth {
            return Err(not_awaiting());
        }
        let oauth = self.oauth.clone().ok_or_else(|| SupervisorError::Auth {
            name: name.to_string(),
            reason: "no OAuth provider configured".to_string(),
        })?;

        info!(server = name, url, "starting OAuth login");
        oauth
            .login(url, scopes)
            .await
            .map_err(|e| SupervisorError::Auth {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if !handle.transition(RuntimeState::Starting) {
            return Err(not_awaiting());
        }
        let result = self
            .connect_streaming(
                &handle,
                url,
                headers,
                HttpAuth::Refresh(oauth),
                AuthStatus::OAuthReady,
            )
            .await;
        match result {
            Ok(()) => Ok(handle),
            Err(err) => {
                self.abort_start(&handle, &err).await;
                Err(err)
            }
        }
    }

    // ---- stop ----

    /// Stops `name` and releases its handle.
    ///
    /// Stopping an already terminal (failed, crashed) backend just forgets it.
    pub async fn stop(&self, name: &str) -> Result<(), SupervisorError> {
        let handle = self
            .get(name)
            .await
            .ok_or_else(|| SupervisorError::NotFound {
                name: name.to_string(),
            })?;
        self.stop_handle(&handle).await;
        self.forget(name, &handle).await;
        Ok(())
    }

    /// Stops every tracked backend concurrently and waits for all of them.
    ///
    /// Safe to call from several tasks at once.
    pub async fn stop_all(&self) {
        let handles: Vec<(String, Arc<Handle>)> = self
            .handles
            .read()
            .await
            .iter()
            .map(|(name, h)| (name.clone(), Arc::clone(h)))
            .collect();
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "stopping all backends");

        join_all(handles.iter().map(|(name, handle)| async move {
            self.stop_handle(handle).await;
            self.forget(name, handle).await;
        }))
        .await;
    }

    /// Stops `name` and starts a fresh handle from the same configuration.
    pub async fn restart(&self, name: &str) -> Result<Arc<Handle>, SupervisorError> {
        let config = self
            .get(name)
            .await
            .ok_or_else(|| SupervisorError::NotFound {
                name: name.to_string(),
            })?
            .config()
            .clone();
        match self.stop(name).await {
            Ok(()) | Err(SupervisorError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }
        self.start(config).await
    }

    async fn stop_handle(&self, handle: &Arc<Handle>) {
        let _serial = handle.stop_lock.lock().await;

        if !handle.is_stopped() {
            handle.mark_stop_requested();
            handle.transition(RuntimeState::Stopping);
            handle.cancel.cancel();
            self.release_channel(handle).await;
            self.terminate_process(handle).await;
            // Streaming backends, never-spawned subprocesses and exits the watcher
            // failed to observe end here; otherwise the watcher already did.
            handle.transition(RuntimeState::Stopped);
        }

        if handle.kind() == HandleKind::Subprocess && handle.pid() != 0 {
            self.untrack(handle.id(), handle.pid()).await;
        }
        handle.mark_tools_ready();
    }

    /// Closes the protocol client and, for streaming backends, the transport.
    async fn release_channel(&self, handle: &Handle) {
        if let Some(client) = handle.take_client() {
            if let Err(e) = client.close().await {
                debug!(server = %handle.id(), error = %e, "client close failed");
            }
        }
        if let Some(transport) = handle.take_transport() {
            if let Err(e) = transport.close().await {
                debug!(server = %handle.id(), error = %e, "transport close failed");
            }
        }
    }

    /// SIGTERM, wait up to the grace period, then SIGKILL.
    async fn terminate_process(&self, handle: &Handle) {
        let Some(process) = handle.process() else {
            return;
        };
        if process.has_exited() {
            return;
        }

        process.terminate();
        if process.wait_exit(self.cfg.stop_grace).await {
            return;
        }
        warn!(server = %handle.id(), pid = process.pid(), grace = ?self.cfg.stop_grace, "backend ignored SIGTERM; killing");
        process.kill();
        if !process.wait_exit(KILL_WAIT).await {
            warn!(server = %handle.id(), pid = process.pid(), "backend exit not observed after kill");
        }
    }

    /// Removes `name` only if it still maps to this exact handle.
    async fn forget(&self, name: &str, handle: &Arc<Handle>) {
        let mut handles = self.handles.write().await;
        if handles.get(name).is_some_and(|h| Arc::ptr_eq(h, handle)) {
            handles.remove(name);
        }
    }

    // ---- identity ----

    /// Terminates verified orphans recorded by a previous run.
    ///
    /// Backends launched by this supervisor are never swept, so this is safe to call
    /// at any time; it only has work to do once per startup. Returns the number killed.
    pub async fn recover_orphans(&self) -> usize {
        let Some(tracker) = self.tracker.clone() else {
            return 0;
        };
        match tokio::task::spawn_blocking(move || tracker.cleanup_orphans()).await {
            Ok(killed) => {
                if killed > 0 {
                    info!(killed, "terminated orphaned backends");
                }
                killed
            }
            Err(e) => {
                warn!(error = %e, "orphan cleanup task failed");
                0
            }
        }
    }

    async fn track(&self, name: &str, pid: u32, command: &str, args: &[String]) {
        let Some(tracker) = self.tracker.clone() else {
            return;
        };
        let (name, command, args) = (name.to_string(), command.to_string(), args.to_vec());
        let res = tokio::task::spawn_blocking(move || {
            tracker
                .add(&name, pid, &command, &args)
                .map_err(|e| (name, e))
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err((name, e))) => {
                warn!(server = %name, error = %e, label = e.as_label(), "failed to record process identity")
            }
            Err(e) => warn!(error = %e, "identity record task failed"),
        }
    }

    async fn untrack(&self, name: &str, pid: u32) {
        let Some(tracker) = self.tracker.clone() else {
            return;
        };
        let owned = name.to_string();
        match tokio::task::spawn_blocking(move || tracker.remove(&owned, pid)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(server = name, error = %e, label = e.as_label(), "failed to drop process identity")
            }
            Err(e) => warn!(error = %e, "identity removal task failed"),
        }
    }

    // ---- signals ----

    /// Waits for SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere), then stops everything.
    pub async fn shutdown_on_signal(&self) -> std::io::Result<()> {
        shutdown::wait_for_shutdown_signal().await?;
        info!("shutdown signal received");
        self.stop_all().await;
        Ok(())
    }
}
