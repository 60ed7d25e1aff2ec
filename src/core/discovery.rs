//! Background tool discovery.
//!
//! Runs after `Running` has been published so slow enumeration never delays it.
//! Success replaces the handle's tool list and publishes `ToolsUpdated`; failure
//! publishes an `Error` event and leaves the state alone. Either way, and also when
//! the handle is cancelled first, the tools-ready latch fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::{select, time};
use tracing::{debug, info, warn};

use super::handle::Handle;
use crate::client::ProtocolClient;
use crate::error::ClientError;
use crate::events::Event;

pub(crate) fn spawn_discovery(handle: Arc<Handle>, client: Arc<dyn ProtocolClient>, limit: Duration) {
    tokio::spawn(async move {
        let outcome = select! {
            biased;
            _ = handle.cancel.cancelled() => None,
            res = time::timeout(limit, client.list_tools()) => {
                Some(res.unwrap_or(Err(ClientError::Timeout(limit))))
            }
        };

        match outcome {
            Some(Ok(tools)) => {
                let tools = handle.set_tools(tools);
                info!(server = %handle.id(), count = tools.len(), "tools discovered");
                handle.bus().publish(Event::tools_updated(handle.id(), tools));
            }
            Some(Err(e)) => {
                warn!(server = %handle.id(), error = %e, "tool discovery failed");
                handle.bus().publish(Event::error(
                    handle.id(),
                    "tool discovery failed",
                    Some(e.to_string()),
                ));
            }
            None => debug!(server = %handle.id(), "tool discovery aborted"),
        }
        handle.mark_tools_ready();
    });
}
