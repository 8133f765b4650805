//! Configuration for conductor-client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, Result};
use crate::transport::WsClientConfig;

/// Connection-level timeout used when none is configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Options for `connect`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOpts {
    /// Conductor interface URL. Discovered from the hosting server when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Per-phase call timeout in milliseconds (0 = never time out)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Server that hosts `_dna_connections.json`, used only when `url` is unset
    #[serde(default = "default_discovery_base_url")]
    pub discovery_base_url: String,

    /// Passed through to the WebSocket adapter
    #[serde(default)]
    pub ws_client: WsClientConfig,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_discovery_base_url() -> String {
    "http://localhost".to_string()
}

impl Default for ConnectOpts {
    fn default() -> Self {
        Self {
            url: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            discovery_base_url: default_discovery_base_url(),
            ws_client: WsClientConfig::default(),
        }
    }
}

impl ConnectOpts {
    /// Options targeting an explicit URL, everything else default.
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Load options from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }

    /// Save options to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        std::fs::write(path.as_ref(), content)
            .map_err(|e| ClientError::Config(format!("Failed to write config: {}", e)))
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::from_millis(self.timeout_ms)
    }
}

/// Resolves the effective timeout of a single call.
///
/// A per-call override wins when it is non-zero; otherwise the
/// connection-level default applies. A default of zero means no timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    default: Option<Duration>,
}

impl TimeoutPolicy {
    pub fn from_millis(ms: u64) -> Self {
        Self {
            default: (ms > 0).then(|| Duration::from_millis(ms)),
        }
    }

    /// A policy under which calls wait indefinitely.
    pub fn none() -> Self {
        Self { default: None }
    }

    pub fn default_timeout(&self) -> Option<Duration> {
        self.default
    }

    pub fn resolve(&self, override_ms: Option<u64>) -> Option<Duration> {
        match override_ms {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => self.default,
        }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self::from_millis(DEFAULT_TIMEOUT_MS)
    }
}
