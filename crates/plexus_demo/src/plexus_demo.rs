//! Demo plugins for trying out a host and for its integration tests.
//!
//! Nothing here is part of the host itself; `ping` and `pong` are the same
//! plugin built under two names.
//!
//! `Probe` records what it receives and can be told to call other plugins,
//! signal events or fail, which makes the host's routing observable from
//! outside.

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use plexus_runtime::{Address, Handlers, Payload, Plugin, PluginContext, RuntimeError};

/// An event callback as the probe saw it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub value: Value,
    pub questioner: Option<String>,
}

#[derive(Debug, Default)]
pub struct Probe {
    init_args: Value,
    recorded: Vec<Value>,
    deliveries: Vec<Delivery>,
}

impl Plugin for Probe {
    fn register(handlers: &mut Handlers<Self>) {
        handlers
            .on("echo", |_: &mut Probe, _, (value,): (Value,)| Ok(value))
            .on("add", |_: &mut Probe, _, (a, b): (i64, i64)| Ok(a + b))
            .on("pid", |_: &mut Probe, _, ()| Ok(std::process::id()))
            .on("init_args", |me: &mut Probe, _, ()| Ok(me.init_args.clone()))
            .on("record", |me: &mut Probe, _, (value,): (Value,)| {
                me.recorded.push(value);
                Ok(())
            })
            .on("recorded", |me: &mut Probe, _, ()| Ok(me.recorded.clone()))
            .on("on_event", |me: &mut Probe, ctx, (value,): (Value,)| {
                me.deliveries.push(Delivery {
                    value,
                    questioner: ctx.questioner().map(str::to_string),
                });
                Ok(())
            })
            .on("deliveries", |me: &mut Probe, _, ()| Ok(me.deliveries.clone()))
            .on("emit", |_: &mut Probe, ctx, (event, value): (String, Value)| {
                ctx.signal_event(&event, (value,))?;
                Ok(())
            })
            .on("call", |_: &mut Probe, ctx, (plugin, method, args): (String, String, Value)| {
                relay(ctx, Address::plugin(plugin, method), args)
            })
            .on("notify", |_: &mut Probe, ctx, (plugin, method, args): (String, String, Value)| {
                ctx.call_method((plugin, method), args)?;
                Ok(())
            })
            .on("host", |_: &mut Probe, ctx, (method, args): (String, Value)| {
                relay(ctx, Address::host(method), args)
            })
            .on("sleep", |_: &mut Probe, _, (ms,): (u64,)| {
                thread::sleep(Duration::from_millis(ms));
                Ok(())
            })
            .on("fail", |_: &mut Probe, _, (message,): (String,)| -> anyhow::Result<()> {
                anyhow::bail!(message)
            });
    }

    fn initialize(&mut self, ctx: &mut PluginContext, args: Payload) -> anyhow::Result<()> {
        self.init_args = args.decode()?;
        info!("Probe {} initialized with {}", ctx.name(), self.init_args);
        Ok(())
    }
}

/// Call a function and turn a routing failure into a value
fn relay(ctx: &mut PluginContext, address: Address, args: Value) -> anyhow::Result<Value> {
    match ctx.call_function::<Value, _>(address, args) {
        Ok(value) => Ok(value),
        Err(RuntimeError::Routing(message)) => Ok(json!({ "error": message })),
        Err(e) => Err(e.into()),
    }
}
