use std::sync::Arc;

use tracing::warn;

use super::{config::SupervisorConfig, supervisor::Supervisor};
use crate::{
    client::{Connector, OAuthProvider},
    events::Bus,
    identity::IdentityTracker,
    subscribers::Subscribe,
};

/// How the builder obtains an identity tracker.
enum Tracking {
    /// Open one in the configured (or default) state directory.
    StateDir,
    Explicit(Arc<IdentityTracker>),
    Disabled,
}

/// Builder for constructing a Supervisor with optional collaborators.
pub struct SupervisorBuilder {
    cfg: SupervisorConfig,
    connector: Arc<dyn Connector>,
    oauth: Option<Arc<dyn OAuthProvider>>,
    tracking: Tracking,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl SupervisorBuilder {
    /// Creates a new builder with the given configuration and connector.
    pub fn new(cfg: SupervisorConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            cfg,
            connector,
            oauth: None,
            tracking: Tracking::StateDir,
            subscribers: Vec::new(),
        }
    }

    /// Sets the OAuth collaborator used by streaming backends.
    ///
    /// Without one, an auth challenge is a plain connection failure.
    pub fn with_oauth(mut self, oauth: Arc<dyn OAuthProvider>) -> Self {
        self.oauth = Some(oauth);
        self
    }

    /// Uses an already opened identity tracker.
    pub fn with_tracker(mut self, tracker: Arc<IdentityTracker>) -> Self {
        self.tracking = Tracking::Explicit(tracker);
        self
    }

    /// Disables orphan tracking entirely.
    pub fn without_tracking(mut self) -> Self {
        self.tracking = Tracking::Disabled;
        self
    }

    /// Subscribers attached to the bus before any backend starts.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds and returns the Supervisor instance.
    ///
    /// Must be called from within a Tokio runtime (the bus spawns its dispatcher).
    /// A tracker that cannot be opened is logged and tracking is skipped.
    pub fn build(self) -> Arc<Supervisor> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        for sub in self.subscribers {
            bus.attach(sub);
        }

        let tracker = match self.tracking {
            Tracking::Explicit(t) => Some(t),
            Tracking::Disabled => None,
            Tracking::StateDir => match self.cfg.resolved_state_dir() {
                Some(dir) => match IdentityTracker::open(&dir) {
                    Ok(t) => Some(Arc::new(t)),
                    Err(e) => {
                        warn!(dir = %dir.display(), error = %e, "identity tracking disabled");
                        None
                    }
                },
                None => {
                    warn!("no state directory; identity tracking disabled");
                    None
                }
            },
        };

        Arc::new(Supervisor::new_internal(
            self.cfg,
            bus,
            self.connector,
            self.oauth,
            tracker,
        ))
    }
}
