//! Starting and stopping plugin executables

use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};
use uuid::Uuid;

use plexus_envelope::{Channel, ChannelRole, Envelope};
use plexus_runtime::{PLUGIN_ENV, SOCKET_ENV};

use crate::{Error, HostConfig, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A started plugin process with both channels attached
pub(crate) struct Spawned {
    pub child: Child,
    /// Host end of the channel the host writes requests into
    pub inbound: Channel,
    /// Host end of the channel the plugin writes requests into
    pub outbound: Channel,
}

/// Registry name of a plugin executable: its file stem
pub fn plugin_name(file: &Path) -> Result<String> {
    file.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::Spawn(format!("no plugin name in {}", file.display())))
}

/// Removes the handshake socket once both channels are attached
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// Start `file` and wait for it to attach its inbound and outbound channels
pub(crate) fn spawn_plugin(file: &Path, name: &str, config: &HostConfig) -> Result<Spawned> {
    fs::create_dir_all(&config.socket_dir)?;
    let socket = SocketFile(
        config
            .socket_dir
            .join(format!("plexus-{}-{}.sock", name, Uuid::new_v4().simple())),
    );
    let listener = UnixListener::bind(&socket.0)?;
    listener.set_nonblocking(true)?;

    debug!("Spawning plugin {} from {}", name, file.display());
    let mut child = Command::new(file)
        .env(SOCKET_ENV, &socket.0)
        .env(PLUGIN_ENV, name)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::Spawn(format!("{}: {}", file.display(), e)))?;

    match attach(&listener, &mut child, name, config.connect_timeout()) {
        Ok((inbound, outbound)) => Ok(Spawned {
            child,
            inbound,
            outbound,
        }),
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            Err(e)
        }
    }
}

fn attach(
    listener: &UnixListener,
    child: &mut Child,
    name: &str,
    timeout: Duration,
) -> Result<(Channel, Channel)> {
    let deadline = Instant::now() + timeout;
    let handshake = |reason: String| Error::Handshake {
        name: name.to_string(),
        reason,
    };

    let mut inbound = None;
    let mut outbound = None;
    while inbound.is_none() || outbound.is_none() {
        match listener.accept() {
            Ok((stream, _)) => {
                stream.set_nonblocking(false)?;
                let mut channel = Channel::new(stream);
                let remaining = deadline.saturating_duration_since(Instant::now());
                channel.set_read_timeout(Some(remaining.max(POLL_INTERVAL)))?;
                match channel.recv() {
                    Ok(Some(Envelope::Attach(ChannelRole::Inbound))) => inbound = Some(channel),
                    Ok(Some(Envelope::Attach(ChannelRole::Outbound))) => outbound = Some(channel),
                    Ok(Some(other)) => {
                        return Err(handshake(format!("expected attach, got {:?}", other.kind())));
                    }
                    Ok(None) => return Err(handshake("connection closed".into())),
                    Err(e) => return Err(handshake(e.to_string())),
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if let Some(status) = child.try_wait()? {
                    return Err(handshake(format!("process exited with {status}")));
                }
                if Instant::now() >= deadline {
                    return Err(handshake(format!("not connected after {:?}", timeout)));
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }

    // Both options are set once the loop ends
    match (inbound, outbound) {
        (Some(inbound), Some(outbound)) => {
            inbound.set_read_timeout(None)?;
            outbound.set_read_timeout(None)?;
            Ok((inbound, outbound))
        }
        _ => Err(handshake("incomplete attach".into())),
    }
}

/// Wait for a stopping plugin to exit, killing it after `timeout`
pub(crate) fn stop_process(name: &str, child: &mut Child, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Plugin {} exited with {}", name, status);
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            Ok(None) => {
                warn!("Plugin {} did not exit in time, killing", name);
                let _ = child.kill();
                let _ = child.wait();
                return;
            }
            Err(e) => {
                error!("Error waiting for plugin {}: {}", name, e);
                let _ = child.kill();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_name_is_file_stem() {
        assert_eq!(plugin_name(Path::new("/opt/plugins/recorder")).unwrap(), "recorder");
        assert_eq!(plugin_name(Path::new("relay.sh")).unwrap(), "relay");
        assert!(plugin_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_stop_process_kills_after_timeout() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let started = Instant::now();
        stop_process("sleeper", &mut child, Duration::from_millis(100));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_stop_process_returns_when_exited() {
        let mut child = Command::new("true").spawn().unwrap();
        stop_process("quick", &mut child, Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn test_spawn_fails_when_process_never_connects() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::default()
            .with_socket_dir(dir.path())
            .with_connect_timeout(Duration::from_secs(5));
        let err = spawn_plugin(Path::new("true"), "true", &config).err().unwrap();
        assert!(matches!(err, Error::Handshake { .. }));

        // Socket file is cleaned up
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_spawn_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let config = HostConfig::default().with_socket_dir(dir.path());
        let err = spawn_plugin(&dir.path().join("missing"), "missing", &config)
            .err()
            .unwrap();
        assert!(matches!(err, Error::Spawn(_)));
    }
}
