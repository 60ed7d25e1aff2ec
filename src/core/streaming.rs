//! # Streaming backend connection.
//!
//! Auth resolution order:
//! 1. bearer token from the configured environment variable
//! 2. cached OAuth token (refreshed on demand through the provider)
//! 3. OAuth discovery probe → `NeedsAuth`, without failing
//! 4. no credentials
//!
//! An auth challenge while connecting or during the handshake triggers
//! challenge-based discovery; if an authorization server is found the backend
//! waits for login (`NeedsAuth`) instead of failing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::state::AuthStatus;
use crate::client::{Connector, HttpAuth, HttpConnect, OAuthProvider, StreamingConnection};
use crate::error::ClientError;

/// Credentials chosen for a connection attempt.
#[derive(Debug)]
pub(crate) enum AuthPlan {
    Connect(HttpAuth, AuthStatus),
    NeedsLogin,
}

/// Picks credentials for `url`.
pub(crate) async fn resolve_auth(
    server: &str,
    url: &str,
    bearer_env: Option<&str>,
    oauth: Option<&Arc<dyn OAuthProvider>>,
) -> AuthPlan {
    if let Some(var) = bearer_env {
        match std::env::var(var) {
            Ok(token) if !token.is_empty() => {
                debug!(server, var, "using bearer token from environment");
                return AuthPlan::Connect(HttpAuth::Bearer(token), AuthStatus::Bearer);
            }
            _ => debug!(server, var, "bearer variable unset or empty"),
        }
    }

    let Some(oauth) = oauth else {
        return AuthPlan::Connect(HttpAuth::None, AuthStatus::None);
    };
    if oauth.token(url).await.is_some() {
        return AuthPlan::Connect(HttpAuth::Refresh(Arc::clone(oauth)), AuthStatus::OAuthReady);
    }
    if oauth.probe(url).await {
        info!(server, url, "server supports OAuth; login required");
        return AuthPlan::NeedsLogin;
    }
    AuthPlan::Connect(HttpAuth::None, AuthStatus::None)
}

/// Opens the transport.
pub(crate) async fn connect(
    connector: &dyn Connector,
    url: &str,
    auth: HttpAuth,
    headers: &HashMap<String, String>,
) -> Result<StreamingConnection, ClientError> {
    connector
        .http(HttpConnect {
            url: url.to_string(),
            auth,
            headers: headers.clone(),
        })
        .await
}

/// Whether an auth challenge should park the backend in `NeedsAuth`.
pub(crate) async fn challenge_needs_login(
    server: &str,
    url: &str,
    error: &ClientError,
    oauth: Option<&Arc<dyn OAuthProvider>>,
) -> bool {
    let ClientError::Unauthorized { challenge } = error else {
        return false;
    };
    let Some(oauth) = oauth else {
        debug!(server, "auth challenge but no OAuth provider configured");
        return false;
    };
    let found = oauth.discover(url, challenge.as_deref()).await;
    debug!(server, found, "OAuth discovery after challenge");
    found
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct Provider {
        token: Option<String>,
        supports_oauth: bool,
        seen_challenge: Mutex<Option<String>>,
    }

    #[async_trait]
    impl OAuthProvider for Provider {
        async fn token(&self, _url: &str) -> Option<String> {
            self.token.clone()
        }
        async fn probe(&self, _url: &str) -> bool {
            self.supports_oauth
        }
        async fn discover(&self, _url: &str, challenge: Option<&str>) -> bool {
            *self.seen_challenge.lock().unwrap() = challenge.map(str::to_string);
            self.supports_oauth
        }
        async fn login(&self, _url: &str, _scopes: &[String]) -> Result<(), ClientError> {
            Ok(())
        }
    }

    fn provider(p: Provider) -> Arc<dyn OAuthProvider> {
        Arc::new(p)
    }

    #[tokio::test]
    async fn env_bearer_takes_precedence() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("VISOR_TEST_BEARER_PRECEDENCE", "tok") };
        let oauth = provider(Provider {
            token: Some("cached".into()),
            ..Provider::default()
        });
        let plan = resolve_auth(
            "s",
            "http://x",
            Some("VISOR_TEST_BEARER_PRECEDENCE"),
            Some(&oauth),
        )
        .await;
        assert!(matches!(
            plan,
            AuthPlan::Connect(HttpAuth::Bearer(ref t), AuthStatus::Bearer) if t == "tok"
        ));
    }

    #[tokio::test]
    async fn cached_token_then_probe() {
        let cached = provider(Provider {
            token: Some("cached".into()),
            ..Provider::default()
        });
        assert!(matches!(
            resolve_auth("s", "http://x", Some("VISOR_TEST_UNSET_VAR"), Some(&cached)).await,
            AuthPlan::Connect(HttpAuth::Refresh(_), AuthStatus::OAuthReady)
        ));

        let probing = provider(Provider {
            supports_oauth: true,
            ..Provider::default()
        });
        assert!(matches!(
            resolve_auth("s", "http://x", None, Some(&probing)).await,
            AuthPlan::NeedsLogin
        ));

        assert!(matches!(
            resolve_auth("s", "http://x", None, None).await,
            AuthPlan::Connect(HttpAuth::None, AuthStatus::None)
        ));
    }

    #[tokio::test]
    async fn challenge_runs_discovery() {
        let p = Arc::new(Provider {
            supports_oauth: true,
            ..Provider::default()
        });
        let oauth: Arc<dyn OAuthProvider> = p.clone();
        let err = ClientError::Unauthorized {
            challenge: Some("Bearer resource_metadata=\"m\"".into()),
        };
        assert!(challenge_needs_login("s", "http://x", &err, Some(&oauth)).await);
        assert_eq!(
            p.seen_challenge.lock().unwrap().as_deref(),
            Some("Bearer resource_metadata=\"m\"")
        );

        assert!(!challenge_needs_login("s", "http://x", &ClientError::Closed, Some(&oauth)).await);
        assert!(!challenge_needs_login("s", "http://x", &err, None).await);
    }
}
