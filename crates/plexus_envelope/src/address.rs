use std::fmt;

use serde::{Deserialize, Serialize};

/// Destination of a call: a plugin name plus a method name.
///
/// A missing plugin name addresses the host itself. Once the host has
/// delivered a call to its target the plugin name is stripped, leaving the
/// bare method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub method: String,
}

impl Address {
    /// Address a host-level operation
    pub fn host(method: impl Into<String>) -> Self {
        Self {
            plugin: None,
            method: method.into(),
        }
    }

    /// Address a method on a named plugin
    pub fn plugin(plugin: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            plugin: Some(plugin.into()),
            method: method.into(),
        }
    }

    /// A bare method name with no plugin, as seen by the plugin that
    /// receives a delivered call, or the name of an event
    pub fn local(method: impl Into<String>) -> Self {
        Self::host(method)
    }
}

impl From<(&str, &str)> for Address {
    fn from((plugin, method): (&str, &str)) -> Self {
        Self::plugin(plugin, method)
    }
}

impl From<(String, String)> for Address {
    fn from((plugin, method): (String, String)) -> Self {
        Self::plugin(plugin, method)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plugin {
            Some(plugin) => write!(f, "{}.{}", plugin, self.method),
            None => write!(f, "<host>.{}", self.method),
        }
    }
}
