//! Plexus Runtime - the in-process side of a plugin.
//!
//! Each plugin executable hands its business object to [`launch`]. The
//! runtime then reads envelopes from the host, queues them, and a single
//! worker thread dispatches them one at a time to the handlers the plugin
//! registered.
//!
//! # Lifecycle
//!
//! - `initialize`: called once, right after the host opens the start gate
//! - named handlers: invoked for every `Method`/`Function` addressed to them
//! - `shut_down`: called when the worker reaches a `Stop`

mod context;
mod error;
mod handlers;
mod launch;
mod queue;
mod runtime;
mod worker;

pub use context::*;
pub use error::*;
pub use handlers::*;
pub use launch::*;
pub use queue::*;
pub use runtime::*;
pub use worker::{RuntimeStatus, WorkerState};

pub use plexus_envelope::{Address, INITIALIZE, Payload};

/// A plugin's business object
pub trait Plugin: Send + Sized + 'static {
    /// Register the named handlers this plugin answers to
    fn register(handlers: &mut Handlers<Self>);

    /// Called once with the arguments the plugin was loaded with
    fn initialize(&mut self, _ctx: &mut PluginContext, _args: Payload) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the worker processes `Stop`, after every job queued before
    /// it has run.
    ///
    /// The stop acknowledgement has already gone out when this runs, so the
    /// host no longer routes anything the plugin sends from here. Methods and
    /// events are dropped, and a `call_function` blocks until the host kills
    /// the process. Use this hook for local cleanup only.
    fn shut_down(&mut self, _ctx: &mut PluginContext) {}
}
