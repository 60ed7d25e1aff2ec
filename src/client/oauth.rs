//! # OAuth collaborator.
//!
//! Token storage, refresh and the browser flow live outside this crate; the
//! supervisor only needs these four calls to decide between `Running`, `NeedsAuth`
//! and `Error` for a streaming backend.

use async_trait::async_trait;

use crate::error::ClientError;

#[async_trait]
pub trait OAuthProvider: Send + Sync + 'static {
    /// Returns a cached (possibly refreshed) access token for `url`.
    async fn token(&self, url: &str) -> Option<String>;

    /// Probes whether `url` advertises OAuth support.
    async fn probe(&self, url: &str) -> bool;

    /// Runs discovery using the challenge returned by the server.
    ///
    /// Returns true if an OAuth authorization server was found.
    async fn discover(&self, url: &str, challenge: Option<&str>) -> bool;

    /// Runs the interactive login flow for `url` and stores the resulting token.
    async fn login(&self, url: &str, scopes: &[String]) -> Result<(), ClientError>;
}
