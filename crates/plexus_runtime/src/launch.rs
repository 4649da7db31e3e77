//! Entry point for plugin executables
//!
//! The host starts a plugin executable with the path of a Unix socket in
//! `PLEXUS_SOCKET`. The plugin connects twice (inbound, then outbound),
//! waits for the start gate and only then builds its business object.

use std::env;
use std::io;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use plexus_envelope::{Channel, ChannelRole, Envelope};

use crate::{Plugin, PluginRuntime, RuntimeError, RuntimeResult};

/// Environment variable holding the host socket path
pub const SOCKET_ENV: &str = "PLEXUS_SOCKET";

/// Environment variable holding the plugin's registered name
pub const PLUGIN_ENV: &str = "PLEXUS_PLUGIN";

/// Run a plugin process to completion.
///
/// ```rust,ignore
/// fn main() -> anyhow::Result<()> {
///     plexus_runtime::launch(MyPlugin::default)
/// }
/// ```
pub fn launch<P: Plugin>(factory: impl FnOnce() -> P) -> Result<()> {
    // Logs go to stderr; the channels carry framed envelopes only
    let _ = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();

    let socket = env::var_os(SOCKET_ENV)
        .map(PathBuf::from)
        .with_context(|| format!("{SOCKET_ENV} is not set; plugins are started by the plexus host"))?;
    let name = env::var(PLUGIN_ENV).unwrap_or_else(|_| "plugin".to_string());

    let mut inbound = Channel::connect(&socket, ChannelRole::Inbound)
        .with_context(|| format!("connecting inbound channel to {}", socket.display()))?;
    let outbound = Channel::connect(&socket, ChannelRole::Outbound)
        .with_context(|| format!("connecting outbound channel to {}", socket.display()))?;

    if !await_start(&mut inbound)? {
        info!("Plugin {} was not started by the host", name);
        return Ok(());
    }

    info!("Plugin {} running (pid {})", name, std::process::id());
    PluginRuntime::new(name, factory(), inbound, outbound).run()?;
    Ok(())
}

/// Block on the start gate; `false` means the host declined or went away
fn await_start(inbound: &mut Channel) -> RuntimeResult<bool> {
    match inbound.recv()? {
        Some(Envelope::Start(go)) => Ok(go),
        None => Ok(false),
        Some(other) => Err(RuntimeError::Handshake(format!(
            "expected start signal, got {:?}",
            other.kind()
        ))),
    }
}
