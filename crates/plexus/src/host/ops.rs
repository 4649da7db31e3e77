//! Operations plugins can call on the host itself
//!
//! A request whose address names no plugin is a host operation. The caller's
//! registry entry is passed along so subscriptions are made in its name.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info};

use plexus_envelope::{Call, Payload};

use crate::host::{PluginHost, RegistryEntry};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HostOp {
    LoadPlugin,
    UnloadPlugin,
    RestartPlugin,
    PluginList,
    SubscribeEvent,
    UnsubscribeEvent,
}

impl HostOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "load_plugin" => Self::LoadPlugin,
            "unload_plugin" => Self::UnloadPlugin,
            "restart_plugin" => Self::RestartPlugin,
            "plugin_list" => Self::PluginList,
            "subscribe_event" => Self::SubscribeEvent,
            "unsubscribe_event" => Self::UnsubscribeEvent,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::LoadPlugin => "load_plugin",
            Self::UnloadPlugin => "unload_plugin",
            Self::RestartPlugin => "restart_plugin",
            Self::PluginList => "plugin_list",
            Self::SubscribeEvent => "subscribe_event",
            Self::UnsubscribeEvent => "unsubscribe_event",
        }
    }
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Run a host operation on behalf of `caller` and encode its result
pub(crate) fn execute(host: &Arc<PluginHost>, caller: &RegistryEntry, call: &Call) -> Result<Payload> {
    let op = HostOp::from_name(&call.address.method)
        .ok_or_else(|| Error::UnknownOperation(call.address.method.clone()))?;
    debug!("{} -> host {}", caller.name(), op);

    let value = match op {
        HostOp::LoadPlugin => {
            // The init args are optional
            let (file, args) = match call.args.decode::<(PathBuf, Payload)>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    let (file,) = call.args.decode::<(PathBuf,)>()?;
                    (file, Payload::null())
                }
            };
            Payload::encode(&host.load_plugin(&file, &args)?)?
        }
        HostOp::UnloadPlugin => {
            let (name,) = call.args.decode::<(String,)>()?;
            Payload::encode(&found(host.unload_plugin(&name))?)?
        }
        HostOp::RestartPlugin => {
            let (name,) = call.args.decode::<(String,)>()?;
            info!("Restarting plugin {} on request of {}", name, caller.name());
            Payload::encode(&found(host.restart_plugin(&name))?)?
        }
        HostOp::PluginList => Payload::encode(&host.plugin_list())?,
        HostOp::SubscribeEvent => {
            let (plugin, event, callback) = call.args.decode::<(String, String, String)>()?;
            host.subscribe_event(caller.name(), &plugin, &event, &callback)?;
            Payload::encode(&true)?
        }
        HostOp::UnsubscribeEvent => {
            let (plugin, event, callback) = call.args.decode::<(String, String, String)>()?;
            Payload::encode(&host.unsubscribe_event(caller.name(), &plugin, &event, &callback)?)?
        }
    };
    Ok(value)
}

/// Unknown plugins answer `false` instead of failing
fn found(result: Result<()>) -> Result<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(Error::UnknownPlugin(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_names_round_trip() {
        for op in [
            HostOp::LoadPlugin,
            HostOp::UnloadPlugin,
            HostOp::RestartPlugin,
            HostOp::PluginList,
            HostOp::SubscribeEvent,
            HostOp::UnsubscribeEvent,
        ] {
            assert_eq!(HostOp::from_name(op.name()), Some(op));
        }
        assert_eq!(HostOp::from_name("initialize"), None);
    }

    #[test]
    fn test_unknown_plugin_is_false() {
        assert!(!found(Err(Error::UnknownPlugin("ghost".into()))).unwrap());
        assert!(found(Ok(())).unwrap());
        assert!(found(Err(Error::Timeout)).is_err());
    }
}
