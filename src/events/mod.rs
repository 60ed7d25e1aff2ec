//! Runtime events: types and distribution bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the supervisor and per-handle tasks.
//!
//! ## Contents
//! - [`Event`], [`EventKind`], [`EventPayload`] event classification and payload
//! - [`Bus`] bounded fan-out with an explicit drop-newest overload policy
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (state transitions), exit watchers, stderr readers,
//!   tool discovery tasks.
//! - **Consumers**: closures registered with [`Bus::subscribe`] and
//!   [`Subscribe`](crate::Subscribe) objects attached with [`Bus::attach`].

mod bus;
mod event;

pub use bus::{Bus, DEFAULT_BUS_CAPACITY, Dispatcher, Unsubscribe};
pub use event::{Event, EventKind, EventPayload};
