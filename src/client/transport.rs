//! # Transport constructors.
//!
//! ```text
//! Subprocess: Child{stdin, stdout} ──► Connector::stdio()  ──► ProtocolClient
//! Streaming:  HttpConnect{url, auth} ──► Connector::http() ──► {ProtocolClient, Transport}
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::{ChildStdin, ChildStdout};

use super::{OAuthProvider, ProtocolClient};
use crate::error::ClientError;

/// Standard streams of a spawned backend, handed over to the protocol channel.
#[derive(Debug)]
pub struct StdioPipes {
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

/// Credentials for a streaming connection.
#[derive(Clone, Default)]
pub enum HttpAuth {
    #[default]
    None,
    /// Static bearer token.
    Bearer(String),
    /// OAuth tokens fetched (and refreshed) on demand from the provider.
    Refresh(Arc<dyn OAuthProvider>),
}

impl fmt::Debug for HttpAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpAuth::None => f.write_str("None"),
            HttpAuth::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            HttpAuth::Refresh(_) => f.write_str("Refresh"),
        }
    }
}

/// Parameters for opening an HTTP streaming connection.
#[derive(Debug, Clone)]
pub struct HttpConnect {
    pub url: String,
    pub auth: HttpAuth,
    pub headers: HashMap<String, String>,
}

/// Live streaming transport; closed directly on stop.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn close(&self) -> Result<(), ClientError>;
}

/// Client plus the transport it runs on.
pub struct StreamingConnection {
    pub client: Arc<dyn ProtocolClient>,
    pub transport: Arc<dyn Transport>,
}

impl fmt::Debug for StreamingConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamingConnection").finish_non_exhaustive()
    }
}

/// Builds protocol clients for both backend kinds.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Wraps a spawned process' standard streams.
    fn stdio(&self, pipes: StdioPipes) -> Result<Arc<dyn ProtocolClient>, ClientError>;

    /// Opens an HTTP streaming connection.
    ///
    /// Returns [`ClientError::Unauthorized`] when the server answers with an auth challenge.
    async fn http(&self, request: HttpConnect) -> Result<StreamingConnection, ClientError>;
}
