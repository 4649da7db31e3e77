//! Shared helpers for the host integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use plexus::{HostConfig, PluginHost};

/// A host with its own socket directory, shut down on drop
pub struct TestHost {
    pub host: Arc<PluginHost>,
    _sockets: TempDir,
}

impl TestHost {
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    pub fn with_config(tweak: impl FnOnce(HostConfig) -> HostConfig) -> Self {
        let sockets = tempfile::tempdir().expect("socket dir");
        let config = HostConfig::default()
            .with_socket_dir(sockets.path())
            .with_connect_timeout(Duration::from_secs(10))
            .with_stop_timeout(Duration::from_secs(2))
            .with_call_timeout(Duration::from_secs(10));
        Self {
            host: PluginHost::new(tweak(config)),
            _sockets: sockets,
        }
    }

    /// A host with `ping` and `pong` loaded
    pub fn with_ping_pong() -> Self {
        let test = Self::new();
        test.host.load_plugin(ping(), &()).expect("load ping");
        test.host.load_plugin(pong(), &()).expect("load pong");
        test
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        self.host.shutdown();
    }
}

pub fn ping() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ping"))
}

pub fn pong() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pong"))
}

/// Poll `check` until it yields a value, failing after ten seconds
pub fn eventually<T>(what: &str, mut check: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(value) = check() {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(20));
    }
}
