//! Retry policies.
//!
//! This module groups the knobs that control **how long** the supervisor waits
//! between subprocess handshake attempts.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid synchronized retries
//!
//! ## Quick wiring
//! ```text
//! SupervisorConfig { handshake_attempts, handshake_backoff: BackoffPolicy }
//!      └─► core::handshake uses backoff.next(attempt - 1) between failed attempts
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::default()` → first=500ms, factor=2.0, max=10s, jitter=None.
//! - `JitterPolicy::None` by default; consider `Equal` when many backends start at once.

mod backoff;
mod jitter;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
