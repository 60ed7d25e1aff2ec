//! Runtime core: backend orchestration and lifecycle.
//!
//! The public surface is [`Supervisor`] (plus its builder and config), the
//! [`Handle`] it returns, and the state types carried by status events.
//!
//! Internal modules:
//! - [`supervisor`]: name → handle map, start/stop/restart/authenticate, orphan recovery;
//! - [`handle`]: per-backend record with independent locks and the state machine;
//! - [`process`]: spawn, exit watcher, diagnostic reader, search path;
//! - [`streaming`]: auth resolution and transport connection;
//! - [`handshake`]: bounded retry loop with backoff;
//! - [`discovery`]: background tool enumeration;
//! - [`shutdown`]: cross-platform termination signal handling.

mod builder;
mod config;
mod discovery;
mod handle;
mod handshake;
mod process;
mod shutdown;
mod state;
mod streaming;
mod supervisor;

pub use builder::SupervisorBuilder;
pub use config::{SupervisorConfig, default_state_dir};
pub use handle::Handle;
pub use shutdown::wait_for_shutdown_signal;
pub use state::{AuthStatus, HandleKind, LastExit, RuntimeState, ServerStatus};
pub use supervisor::Supervisor;
