//! Plexus - a process-isolated plugin host
//!
//! Every plugin runs as its own executable and talks to the host over two
//! channels:
//! - inbound: the host writes method, function and event deliveries, the
//!   plugin writes the results of functions it was asked to evaluate
//! - outbound: the plugin writes its own requests and events, the host
//!   writes the answers to the plugin's function calls
//!
//! The host keeps a registry of loaded plugins and their event
//! subscriptions, and routes everything in between.

// Re-export the plugin-side crates
pub use plexus_envelope;
pub use plexus_runtime;

mod config;
mod types;

// Host registry, lifecycle and routing
pub mod host;

pub use config::{HostConfig, PluginConfig};
pub use host::{PluginHost, RegistryEntry, Subscription};
pub use types::{Error, Result};
