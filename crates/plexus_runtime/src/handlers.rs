use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use plexus_envelope::Payload;

use crate::{HandlerError, PluginContext};

type HandlerFn<P> =
    Box<dyn Fn(&mut P, &mut PluginContext, &Payload) -> Result<Payload, HandlerError> + Send>;

/// Method-name to handler table for one plugin type.
///
/// Arguments are decoded into the handler's typed argument tuple only when
/// the handler runs; a payload that does not fit is an argument mismatch.
///
/// ```rust,ignore
/// handlers
///     .on("add", |_, _, (a, b): (i64, i64)| Ok(a + b))
///     .on("greet", |me, ctx, (who,): (String,)| me.greet(ctx, who));
/// ```
pub struct Handlers<P> {
    table: HashMap<String, HandlerFn<P>>,
}

impl<P: 'static> Handlers<P> {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
        }
    }

    /// Register a handler; a later registration under the same name replaces
    /// the earlier one
    pub fn on<A, R, F>(&mut self, name: &str, handler: F) -> &mut Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(&mut P, &mut PluginContext, A) -> anyhow::Result<R> + Send + 'static,
    {
        let method = name.to_string();
        let wrapped: HandlerFn<P> = Box::new(move |plugin, ctx, args| {
            let args: A = args
                .decode()
                .map_err(|source| HandlerError::ArgumentMismatch {
                    method: method.clone(),
                    source,
                })?;

            let value = handler(plugin, ctx, args).map_err(|error| HandlerError::Fault {
                method: method.clone(),
                error,
            })?;

            Payload::encode(&value).map_err(|e| HandlerError::Fault {
                method: method.clone(),
                error: e.into(),
            })
        });

        self.table.insert(name.to_string(), wrapped);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Run the handler registered under `name`
    pub fn dispatch(
        &self,
        plugin: &mut P,
        ctx: &mut PluginContext,
        name: &str,
        args: &Payload,
    ) -> Result<Payload, HandlerError> {
        match self.table.get(name) {
            Some(handler) => handler(plugin, ctx, args),
            None => Err(HandlerError::UnknownMethod(name.to_string())),
        }
    }
}

impl<P: 'static> Default for Handlers<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_envelope::Channel;

    #[derive(Default)]
    struct Counter {
        total: i64,
    }

    fn context() -> PluginContext {
        let (outbound, _host) = Channel::pair().unwrap();
        PluginContext::new("counter", outbound)
    }

    fn handlers() -> Handlers<Counter> {
        let mut handlers = Handlers::new();
        handlers
            .on("add", |me: &mut Counter, _, (n,): (i64,)| {
                me.total += n;
                Ok(me.total)
            })
            .on("reset", |me: &mut Counter, _, ()| {
                me.total = 0;
                Ok(())
            })
            .on("boom", |_: &mut Counter, _, ()| -> anyhow::Result<()> {
                anyhow::bail!("boom")
            });
        handlers
    }

    #[test]
    fn test_dispatch_decodes_and_encodes() {
        let handlers = handlers();
        let mut plugin = Counter::default();
        let mut ctx = context();

        let args = Payload::encode(&(5,)).unwrap();
        let value = handlers.dispatch(&mut plugin, &mut ctx, "add", &args).unwrap();
        assert_eq!(value.decode::<i64>().unwrap(), 5);

        let value = handlers
            .dispatch(&mut plugin, &mut ctx, "reset", &Payload::null())
            .unwrap();
        assert_eq!(value, Payload::null());
        assert_eq!(plugin.total, 0);
    }

    #[test]
    fn test_dispatch_errors() {
        let handlers = handlers();
        let mut plugin = Counter::default();
        let mut ctx = context();

        let err = handlers
            .dispatch(&mut plugin, &mut ctx, "missing", &Payload::null())
            .unwrap_err();
        assert!(matches!(err, HandlerError::UnknownMethod(ref m) if m == "missing"));
        assert!(!err.is_fatal());

        let args = Payload::encode(&("five",)).unwrap();
        let err = handlers.dispatch(&mut plugin, &mut ctx, "add", &args).unwrap_err();
        assert!(matches!(err, HandlerError::ArgumentMismatch { .. }));
        assert!(err.is_fatal());

        let err = handlers
            .dispatch(&mut plugin, &mut ctx, "boom", &Payload::null())
            .unwrap_err();
        assert!(matches!(err, HandlerError::Fault { .. }));
        assert!(err.is_fatal());
    }
}
