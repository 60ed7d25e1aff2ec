//! # Event subscriber trait.
//!
//! Provides [`Subscribe`] an extension point for plugging named event handlers into the bus.
//!
//! ## Architecture
//! ```text
//! Bus ──► [bounded queue] ──► Dispatcher ──► subscriber.on_event()
//!                                        └─► panic caught → warn! + continue
//! ```
//!
//! ## Rules
//! - Handlers run on the single dispatcher task, in subscription order.
//! - A slow handler delays delivery to handlers after it, but never blocks publishers:
//!   once the queue is full new events are dropped instead.
//! - Keep `on_event` short; hand heavy work off to your own task or channel.
//!
//! ## Example
//! ```rust
//! use mcpvisor::{Event, EventPayload, Subscribe};
//!
//! struct Crashes;
//!
//! impl Subscribe for Crashes {
//!     fn on_event(&self, ev: &Event) {
//!         if let EventPayload::StatusChanged { new, .. } = &ev.payload {
//!             if *new == mcpvisor::RuntimeState::Crashed {
//!                 // page somebody
//!             }
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "crashes" }
//! }
//! ```

use crate::events::Event;

/// Named event handler attached to a [`Bus`](crate::Bus).
///
/// ### Implementation requirements
/// - Return quickly; do not block on I/O.
/// - Handle errors internally. Panics are caught and logged, but leave any state the
///   subscriber guards in whatever shape the panic left it.
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event.
    fn on_event(&self, event: &Event);

    /// Returns the subscriber name used in diagnostics.
    ///
    /// The default uses `type_name::<Self>()`, which can be verbose - override it when possible.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
