mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::sync::atomic::Ordering;

use common::{FakeConnector, FakeOAuth, Recorder, SeenAuth, init_tracing, test_config};
use mcpvisor::{
    AuthStatus, BackendConfig, BackendKind, ClientError, HandleKind, RuntimeState, Subscribe,
    Supervisor, SupervisorError,
};
use tempfile::TempDir;

struct Fixture {
    sup: Arc<Supervisor>,
    connector: Arc<FakeConnector>,
    oauth: Arc<FakeOAuth>,
    events: Arc<Recorder>,
    _state: TempDir,
}

fn fixture(oauth: FakeOAuth) -> Fixture {
    init_tracing();
    let state = tempfile::tempdir().unwrap();
    let connector = FakeConnector::new();
    let oauth = Arc::new(oauth);
    let events = Arc::new(Recorder::default());
    let sup = Supervisor::builder(test_config(&state), connector.clone())
        .with_oauth(oauth.clone())
        .with_subscribers(vec![events.clone() as Arc<dyn Subscribe>])
        .build();
    Fixture {
        sup,
        connector,
        oauth,
        events,
        _state: state,
    }
}

fn remote(name: &str, bearer_env: Option<&str>) -> BackendConfig {
    BackendConfig {
        id: name.to_string(),
        kind: BackendKind::Streaming {
            url: format!("https://{name}.example.com/mcp"),
            headers: HashMap::from([("X-Client".to_string(), "tests".to_string())]),
            bearer_env: bearer_env.map(str::to_string),
            scopes: vec!["tools.read".to_string()],
        },
        startup_timeout: None,
    }
}

#[tokio::test]
async fn bearer_from_environment_wins() {
    // SAFETY: the variable name is unique to this test.
    unsafe { std::env::set_var("MCPVISOR_IT_BEARER", "secret-token") };
    let f = fixture(FakeOAuth {
        token: Mutex::new(Some("cached".to_string())),
        supports_oauth: true,
        ..FakeOAuth::default()
    });

    let handle = f
        .sup
        .start(remote("api", Some("MCPVISOR_IT_BEARER")))
        .await
        .unwrap();
    assert!(handle.is_running());
    assert_eq!(handle.kind(), HandleKind::Streaming);
    assert_eq!(handle.pid(), 0);
    assert_eq!(handle.status().pid, None);
    assert_eq!(handle.auth_status(), AuthStatus::Bearer);
    assert_eq!(
        f.connector.http_auths(),
        vec![SeenAuth::Bearer("secret-token".into())]
    );
    f.sup.stop_all().await;
}

#[tokio::test]
async fn cached_oauth_token_connects_with_refresh() {
    let f = fixture(FakeOAuth {
        token: Mutex::new(Some("cached".to_string())),
        ..FakeOAuth::default()
    });
    let handle = f.sup.start(remote("cached", None)).await.unwrap();
    assert!(handle.is_running());
    assert_eq!(handle.auth_status(), AuthStatus::OAuthReady);
    assert_eq!(f.connector.http_auths(), vec![SeenAuth::Refresh]);
    f.sup.stop_all().await;
}

#[tokio::test]
async fn oauth_without_token_waits_for_login_then_runs() {
    use RuntimeState::*;
    let f = fixture(FakeOAuth {
        supports_oauth: true,
        ..FakeOAuth::default()
    });

    let handle = f.sup.start(remote("login", None)).await.unwrap();
    assert_eq!(handle.state(), NeedsAuth);
    assert_eq!(handle.auth_status(), AuthStatus::OAuthNeedsLogin);
    assert!(f.connector.http_auths().is_empty());
    assert_eq!(f.sup.running_count().await, 0);

    // a waiting backend blocks a second start
    assert!(matches!(
        f.sup.start(remote("login", None)).await.unwrap_err(),
        SupervisorError::AlreadyRunning { .. }
    ));

    let same = f.sup.authenticate("login").await.unwrap();
    assert!(Arc::ptr_eq(&handle, &same));
    assert!(handle.is_running());
    assert_eq!(handle.auth_status(), AuthStatus::OAuthReady);
    assert_eq!(f.oauth.logins.load(Ordering::SeqCst), 1);
    assert_eq!(f.connector.http_auths(), vec![SeenAuth::Refresh]);

    f.events.wait_state("login", Running).await;
    assert_eq!(
        f.events.transitions("login"),
        vec![
            (Idle, Starting),
            (Starting, NeedsAuth),
            (NeedsAuth, Starting),
            (Starting, Running)
        ]
    );

    assert!(matches!(
        f.sup.authenticate("login").await.unwrap_err(),
        SupervisorError::NotAwaitingAuth { .. }
    ));
    f.sup.stop_all().await;
}

#[tokio::test]
async fn auth_challenge_on_connect_parks_in_needs_auth() {
    // the cached token is stale: the server challenges and discovery finds an issuer
    let f = fixture(FakeOAuth {
        token: Mutex::new(Some("stale".to_string())),
        supports_oauth: true,
        ..FakeOAuth::default()
    });
    *f.connector.script.connect_error.lock().unwrap() = Some(ClientError::Unauthorized {
        challenge: Some("Bearer error=\"invalid_token\"".into()),
    });

    let handle = f.sup.start(remote("challenged", None)).await.unwrap();
    assert_eq!(handle.state(), RuntimeState::NeedsAuth);
    assert_eq!(handle.auth_status(), AuthStatus::OAuthNeedsLogin);
    assert!(!handle.tools_ready());

    f.sup.stop("challenged").await.unwrap();
    assert_eq!(handle.state(), RuntimeState::Stopped);
    assert!(handle.tools_ready());
    assert!(f.sup.get("challenged").await.is_none());
}

#[tokio::test]
async fn auth_challenge_without_oauth_support_fails() {
    let f = fixture(FakeOAuth::default());
    *f.connector.script.connect_error.lock().unwrap() =
        Some(ClientError::Unauthorized { challenge: None });

    let err = f.sup.start(remote("denied", None)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Connect { .. }), "{err}");
    assert_eq!(
        f.sup.get("denied").await.unwrap().state(),
        RuntimeState::Error
    );
}

#[tokio::test]
async fn auth_challenge_during_handshake_parks_and_closes_channel() {
    let f = fixture(FakeOAuth {
        token: Mutex::new(Some("cached".to_string())),
        supports_oauth: true,
        ..FakeOAuth::default()
    });
    f.connector
        .script
        .handshake_failures
        .store(1, Ordering::SeqCst);
    *f.connector.script.handshake_error.lock().unwrap() =
        Some(ClientError::Unauthorized { challenge: None });

    let handle = f.sup.start(remote("hs", None)).await.unwrap();
    assert_eq!(handle.state(), RuntimeState::NeedsAuth);
    assert_eq!(f.connector.script.closed_clients.load(Ordering::SeqCst), 1);
    assert_eq!(f.connector.script.closed_transports.load(Ordering::SeqCst), 1);
    f.sup.stop_all().await;
}

#[tokio::test]
async fn connect_failure_is_an_error() {
    let f = fixture(FakeOAuth::default());
    *f.connector.script.connect_error.lock().unwrap() =
        Some(ClientError::Transport("connection refused".into()));

    let err = f.sup.start(remote("down", None)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Connect { .. }), "{err}");
    let handle = f.sup.get("down").await.unwrap();
    assert_eq!(handle.state(), RuntimeState::Error);
    assert!(handle.tools_ready());
    f.events.wait_state("down", RuntimeState::Error).await;
}

#[tokio::test]
async fn streaming_handshake_is_not_retried() {
    let f = fixture(FakeOAuth::default());
    f.connector
        .script
        .handshake_failures
        .store(1, Ordering::SeqCst);

    let err = f.sup.start(remote("once", None)).await.unwrap_err();
    assert!(matches!(err, SupervisorError::Handshake { attempts: 1, .. }), "{err}");
    assert_eq!(f.connector.script.initialize_calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.connector.script.closed_transports.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_login_keeps_waiting() {
    let f = fixture(FakeOAuth {
        supports_oauth: true,
        login_error: Mutex::new(Some(ClientError::Protocol("user cancelled".into()))),
        ..FakeOAuth::default()
    });
    let handle = f.sup.start(remote("cancelled", None)).await.unwrap();

    let err = f.sup.authenticate("cancelled").await.unwrap_err();
    assert!(matches!(err, SupervisorError::Auth { ref reason, .. } if reason.contains("user cancelled")));
    assert_eq!(handle.state(), RuntimeState::NeedsAuth);
    f.sup.stop_all().await;
}

#[tokio::test]
async fn stop_closes_transport_and_publishes_stopped() {
    use RuntimeState::*;
    let f = fixture(FakeOAuth::default());
    let handle = f.sup.start(remote("plain", None)).await.unwrap();
    assert_eq!(handle.auth_status(), AuthStatus::None);
    assert_eq!(f.connector.http_auths(), vec![SeenAuth::None]);

    f.sup.stop("plain").await.unwrap();
    assert_eq!(f.connector.script.closed_transports.load(Ordering::SeqCst), 1);
    assert_eq!(f.connector.script.closed_clients.load(Ordering::SeqCst), 1);
    f.events.wait_state("plain", Stopped).await;
    assert_eq!(
        f.events.transitions("plain"),
        vec![
            (Idle, Starting),
            (Starting, Running),
            (Running, Stopping),
            (Stopping, Stopped)
        ]
    );
}
