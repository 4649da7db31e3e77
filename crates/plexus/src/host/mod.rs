//! Plugin host
//!
//! Starts plugin executables, keeps one [`RegistryEntry`] per plugin and
//! routes calls, results and events between them.

mod entry;
mod listener;
mod ops;
mod plugin_host;
mod process;

pub use entry::{RegistryEntry, Subscription};
pub use plugin_host::PluginHost;
pub use process::plugin_name;
