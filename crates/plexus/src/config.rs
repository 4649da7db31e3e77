//! Host configuration
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `PLEXUS_*` environment variables.
//!
//! ```toml
//! socket_dir = "/run/plexus"
//! call_timeout_ms = 10000
//!
//! [[plugins]]
//! file = "/opt/plugins/recorder"
//! args = { interval = 5 }
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory for the per-plugin handshake sockets
    pub socket_dir: PathBuf,
    /// How long a started executable gets to connect both channels
    pub connect_timeout_ms: u64,
    /// How long an unloading plugin gets to exit before it is killed
    pub stop_timeout_ms: u64,
    /// Upper bound for embedder `call_function` waits
    pub call_timeout_ms: u64,
    /// Plugins loaded at startup, in order
    pub plugins: Vec<PluginConfig>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            socket_dir: env::temp_dir(),
            connect_timeout_ms: 5_000,
            stop_timeout_ms: 5_000,
            call_timeout_ms: 30_000,
            plugins: Vec::new(),
        }
    }
}

/// A plugin to load at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    pub file: PathBuf,
    #[serde(default)]
    pub args: serde_json::Value,
}

impl HostConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(HostConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        Ok(figment.merge(Env::prefixed("PLEXUS_")).extract()?)
    }

    pub fn with_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.socket_dir = dir.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}
