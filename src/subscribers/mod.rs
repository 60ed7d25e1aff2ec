//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait and built-in implementations
//! for handling events distributed through the [`Bus`](crate::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Supervisor / Handle tasks ── publish(Event) ──► Bus ──► Dispatcher
//!                                                             │
//!                                                  ┌──────────┼──────────┐
//!                                                  ▼          ▼          ▼
//!                                              LogWriter  StatusBoard  Custom
//! ```
//!
//! ## Subscriber types
//! - **Passive subscribers** - observe and react to events (logging, alerts)
//! - **Stateful subscribers** - maintain derived state from events (StatusBoard)

mod log;
mod status;
mod subscriber;

pub use log::LogWriter;
pub use status::StatusBoard;
pub use subscriber::Subscribe;
