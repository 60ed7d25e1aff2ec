//! # Protocol client capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// A tool advertised by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Tool {
    /// Creates a tool with no description.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }

    /// Attaches a description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Request/response client bound to one backend.
///
/// Implementations must be cancel-safe: the supervisor may drop an in-flight
/// `list_tools` future when the backend is stopped.
#[async_trait]
pub trait ProtocolClient: Send + Sync + 'static {
    /// Performs the protocol handshake.
    async fn initialize(&self) -> Result<(), ClientError>;

    /// Enumerates the backend's tools.
    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError>;

    /// Releases the client. Called once when the backend is stopped.
    async fn close(&self) -> Result<(), ClientError>;
}
