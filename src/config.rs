//! # Backend configuration record.
//!
//! [`BackendConfig`] describes one backend the supervisor can start. The on-disk
//! schema belongs to the operator tool; records derive `serde` so a loader can hand
//! them straight through.
//!
//! ## Example
//! ```rust
//! use mcpvisor::{BackendConfig, BackendKind};
//!
//! let cfg: BackendConfig = serde_json::from_str(r#"{
//!     "id": "files",
//!     "kind": { "type": "subprocess", "command": "npx", "args": ["-y", "files-server"] },
//!     "startup_timeout": 20
//! }"#).unwrap();
//!
//! assert!(matches!(cfg.kind, BackendKind::Subprocess { .. }));
//! assert_eq!(cfg.startup_timeout, Some(std::time::Duration::from_secs(20)));
//! ```

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind-specific launch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendKind {
    /// Local worker speaking the protocol over stdin/stdout.
    Subprocess {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<PathBuf>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Remote endpoint reached over HTTP streaming.
    Streaming {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        /// Environment variable holding a bearer token; takes precedence over OAuth.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bearer_env: Option<String>,
        #[serde(default)]
        scopes: Vec<String>,
    },
}

/// One backend the supervisor may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: String,
    pub kind: BackendKind,
    /// Per-attempt handshake timeout, in seconds on the wire (`None` = supervisor default).
    #[serde(default, with = "opt_secs", skip_serializing_if = "Option::is_none")]
    pub startup_timeout: Option<Duration>,
}

impl BackendConfig {
    /// Subprocess backend launched as `command args...`.
    pub fn subprocess<I, S>(id: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            kind: BackendKind::Subprocess {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
                cwd: None,
                env: HashMap::new(),
            },
            startup_timeout: None,
        }
    }

    /// Streaming backend at `url`.
    pub fn streaming(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: BackendKind::Streaming {
                url: url.into(),
                headers: HashMap::new(),
                bearer_env: None,
                scopes: Vec::new(),
            },
            startup_timeout: None,
        }
    }

    /// Returns a new config with updated startup timeout.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = Some(timeout);
        self
    }

    /// Returns true for subprocess backends.
    pub fn is_subprocess(&self) -> bool {
        matches!(self.kind, BackendKind::Subprocess { .. })
    }
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(d) => s.serialize_some(&d.as_secs_f64()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let secs = Option::<f64>::deserialize(d)?;
        match secs {
            Some(s) if s.is_finite() && s >= 0.0 => Ok(Some(Duration::from_secs_f64(s))),
            Some(s) => Err(serde::de::Error::custom(format!(
                "invalid startup_timeout: {s}"
            ))),
            None => Ok(None),
        }
    }
}
