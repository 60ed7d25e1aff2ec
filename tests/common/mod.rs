#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mcpvisor::{
    BackoffPolicy, ClientError, Connector, Event, HttpAuth, HttpConnect, OAuthProvider,
    ProtocolClient, RuntimeState, StdioPipes, StreamingConnection, Subscribe, SupervisorConfig,
    Tool, Transport,
};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a private state dir, short grace and fast retries.
pub fn test_config(state: &TempDir) -> SupervisorConfig {
    SupervisorConfig {
        stop_grace: Duration::from_secs(2),
        handshake_attempts: 3,
        handshake_backoff: BackoffPolicy::constant(Duration::from_millis(10)),
        startup_timeout: Duration::from_secs(2),
        state_dir: Some(state.path().to_path_buf()),
        ..SupervisorConfig::default()
    }
}

// ---- protocol fakes ----

/// Shared script for every client a [`FakeConnector`] hands out.
#[derive(Default)]
pub struct Script {
    /// Handshakes fail until this many failures have happened, across all clients.
    pub handshake_failures: AtomicU32,
    pub handshake_error: Mutex<Option<ClientError>>,
    pub tools: Mutex<Vec<Tool>>,
    pub tools_error: Mutex<Option<ClientError>>,
    /// Returned by `Connector::http` instead of a connection.
    pub connect_error: Mutex<Option<ClientError>>,
    pub initialize_calls: AtomicU32,
    pub closed_clients: AtomicUsize,
    pub closed_transports: AtomicUsize,
}

pub struct FakeClient {
    script: Arc<Script>,
    _pipes: Option<StdioPipes>,
}

#[async_trait]
impl ProtocolClient for FakeClient {
    async fn initialize(&self) -> Result<(), ClientError> {
        self.script.initialize_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = &self.script.handshake_failures;
        let failed = remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            let err = self.script.handshake_error.lock().unwrap().clone();
            return Err(err.unwrap_or_else(|| ClientError::Transport("not ready".into())));
        }
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        if let Some(err) = self.script.tools_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self.script.tools.lock().unwrap().clone())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.script.closed_clients.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeTransport {
    script: Arc<Script>,
}

#[async_trait]
impl Transport for FakeTransport {
    async fn close(&self) -> Result<(), ClientError> {
        self.script.closed_transports.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenAuth {
    None,
    Bearer(String),
    Refresh,
}

#[derive(Default)]
pub struct FakeConnector {
    pub script: Arc<Script>,
    pub http_calls: Mutex<Vec<(String, SeenAuth)>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn http_auths(&self) -> Vec<SeenAuth> {
        self.http_calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    fn stdio(&self, pipes: StdioPipes) -> Result<Arc<dyn ProtocolClient>, ClientError> {
        Ok(Arc::new(FakeClient {
            script: Arc::clone(&self.script),
            _pipes: Some(pipes),
        }))
    }

    async fn http(&self, request: HttpConnect) -> Result<StreamingConnection, ClientError> {
        let seen = match &request.auth {
            HttpAuth::None => SeenAuth::None,
            HttpAuth::Bearer(t) => SeenAuth::Bearer(t.clone()),
            HttpAuth::Refresh(_) => SeenAuth::Refresh,
        };
        self.http_calls.lock().unwrap().push((request.url, seen));

        if let Some(err) = self.script.connect_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(StreamingConnection {
            client: Arc::new(FakeClient {
                script: Arc::clone(&self.script),
                _pipes: None,
            }),
            transport: Arc::new(FakeTransport {
                script: Arc::clone(&self.script),
            }),
        })
    }
}

#[derive(Default)]
pub struct FakeOAuth {
    pub token: Mutex<Option<String>>,
    pub supports_oauth: bool,
    pub login_error: Mutex<Option<ClientError>>,
    pub logins: AtomicU32,
}

#[async_trait]
impl OAuthProvider for FakeOAuth {
    async fn token(&self, _url: &str) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    async fn probe(&self, _url: &str) -> bool {
        self.supports_oauth
    }

    async fn discover(&self, _url: &str, _challenge: Option<&str>) -> bool {
        self.supports_oauth
    }

    async fn login(&self, _url: &str, _scopes: &[String]) -> Result<(), ClientError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.login_error.lock().unwrap().clone() {
            return Err(err);
        }
        *self.token.lock().unwrap() = Some("fresh".into());
        Ok(())
    }
}

// ---- event recording ----

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Subscribe for Recorder {
    fn on_event(&self, ev: &Event) {
        self.events.lock().unwrap().push(ev.clone());
    }

    fn name(&self) -> &'static str {
        "Recorder"
    }
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn transitions(&self, server: &str) -> Vec<(RuntimeState, RuntimeState)> {
        self.events()
            .iter()
            .filter(|e| &*e.server == server)
            .filter_map(Event::transition)
            .collect()
    }

    /// Polls until `pred` holds over the recorded events, panicking after 5s.
    pub async fn wait_until(&self, what: &str, pred: impl Fn(&[Event]) -> bool) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if pred(&self.events.lock().unwrap()) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}; got {:#?}", self.events());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits until `server` has published a transition into `state`.
    pub async fn wait_state(&self, server: &str, state: RuntimeState) {
        self.wait_until(&format!("{server} -> {state}"), |evs| {
            evs.iter()
                .any(|e| &*e.server == server && e.transition().is_some_and(|(_, new)| new == state))
        })
        .await;
    }
}
