//! # mcpvisor
//!
//! **mcpvisor** supervises local worker processes and remote streaming connections
//! that speak a request/response tool protocol, on behalf of an interactive operator
//! tool. It starts, monitors and tears down many independently-lifecycled backends,
//! survives their crashes and slow starts, cleans up children orphaned by a previous
//! run, and broadcasts every state change to any number of observers.
//!
//! The wire protocol itself is not implemented here: embedders plug in a
//! [`Connector`] (and optionally an [`OAuthProvider`]) built on their protocol library.
//!
//! ## Architecture
//! ```text
//!   start(BackendConfig)     stop(name) / stop_all()      authenticate(name)
//!            │                        │                           │
//!            ▼                        ▼                           ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Supervisor                                                           │
//! │  - RwLock<HashMap<name, Arc<Handle>>>                                 │
//! │  - Connector / OAuthProvider (external collaborators)                 │
//! │  - IdentityTracker (processes.json, orphan sweep at startup)          │
//! └──────┬──────────────────────────┬─────────────────────────────────────┘
//!        ▼                          ▼
//!  ┌────────────┐             ┌────────────┐
//!  │   Handle   │  ...        │   Handle   │   one per backend, never reused
//!  │ subprocess │             │ streaming  │
//!  └┬───────────┘             └┬───────────┘
//!   │ exit watcher              │ tool discovery
//!   │ stderr reader             │
//!   │ tool discovery            │
//!   ▼                           ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  Bus: bounded queue (drop newest when full) ─► single dispatcher      │
//! └──────────────────────────────────┬────────────────────────────────────┘
//!                          ┌─────────┼──────────┐
//!                          ▼         ▼          ▼
//!                      LogWriter StatusBoard  closures
//! ```
//!
//! ### Backend lifecycle
//! ```text
//! Idle ─► Starting ─┬─► Running ─┬─► Stopping ─► Stopped
//!                   │            ├─► Stopped   (clean exit)
//!                   │            ├─► Crashed   (unexpected exit)
//!                   │            └─► Error
//!                   ├─► Error    (spawn / connect / handshake failure)
//!                   └─► NeedsAuth ─► Starting  (after authenticate)
//! ```
//!
//! ## Features
//! | Area              | Description                                             | Key types / traits                           |
//! |-------------------|---------------------------------------------------------|----------------------------------------------|
//! | **Supervision**   | Start, stop, restart and log in to backends.            | [`Supervisor`], [`Handle`]                   |
//! | **Events**        | Non-blocking fan-out of state changes, logs, tools.     | [`Bus`], [`Event`], [`EventPayload`]         |
//! | **Subscribers**   | Named observers; built-in logging and status board.     | [`Subscribe`], [`LogWriter`], [`StatusBoard`]|
//! | **Identity**      | PID-reuse-safe orphan cleanup across operator restarts. | [`IdentityTracker`], [`ProcessProbe`]        |
//! | **Collaborators** | Protocol client, transports and OAuth contracts.        | [`Connector`], [`ProtocolClient`]            |
//! | **Policies**      | Handshake retry delays.                                 | [`BackoffPolicy`], [`JitterPolicy`]          |
//! | **Errors**        | Typed errors with stable labels.                        | [`SupervisorError`], [`ClientError`]         |
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcpvisor::{
//!     BackendConfig, Connector, EventPayload, LogWriter, StatusBoard, Subscribe, Supervisor,
//!     SupervisorConfig,
//! };
//!
//! async fn run(connector: Arc<dyn Connector>) -> Result<(), Box<dyn std::error::Error>> {
//!     let board = Arc::new(StatusBoard::new());
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new()), board.clone()];
//!
//!     let sup = Supervisor::builder(SupervisorConfig::default(), connector)
//!         .with_subscribers(subs)
//!         .build();
//!     sup.recover_orphans().await;
//!
//!     sup.subscribe(|ev| {
//!         if let EventPayload::ToolsUpdated { tools } = &ev.payload {
//!             println!("{}: {} tools", ev.server, tools.len());
//!         }
//!     });
//!
//!     sup.start(BackendConfig::subprocess("echo-1", "echo-server", ["--stdio"])).await?;
//!     sup.start(BackendConfig::streaming("remote", "https://tools.example.com/mcp")).await?;
//!
//!     println!("running: {:?}", sup.running_names().await);
//!     sup.shutdown_on_signal().await?;
//!     Ok(())
//! }
//! ```
mod client;
mod config;
mod core;
mod error;
mod events;
mod identity;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use client::{
    Connector, HttpAuth, HttpConnect, OAuthProvider, ProtocolClient, StdioPipes,
    StreamingConnection, Tool, Transport,
};
pub use config::{BackendConfig, BackendKind};
pub use core::{
    AuthStatus, Handle, HandleKind, LastExit, RuntimeState, ServerStatus, Supervisor,
    SupervisorBuilder, SupervisorConfig, default_state_dir, wait_for_shutdown_signal,
};
pub use error::{ClientError, SupervisorError, TrackerError};
pub use events::{Bus, DEFAULT_BUS_CAPACITY, Dispatcher, Event, EventKind, EventPayload, Unsubscribe};
pub use identity::{
    IDENTITY_FILE, IdentityEntry, IdentityTracker, MAX_UNVERIFIED_PASSES, ProcessProbe,
    SystemProbe, Verdict,
};
pub use policies::{BackoffPolicy, JitterPolicy};
pub use subscribers::{LogWriter, StatusBoard, Subscribe};
