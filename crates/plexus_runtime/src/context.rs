use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use plexus_envelope::{Address, Call, Channel, Envelope, EnvelopeError, Payload};

use crate::{RuntimeError, RuntimeResult};

/// A plugin's handle on the outside world.
///
/// Owned by the worker thread and lent to every handler. All traffic goes
/// out on the plugin's outbound channel; `call_function` then blocks on
/// that same channel until its `Result` comes back.
pub struct PluginContext {
    name: String,
    outbound: Channel,
    questioner: Option<String>,
    next_id: u64,
}

impl PluginContext {
    pub fn new(name: impl Into<String>, outbound: Channel) -> Self {
        Self {
            name: name.into(),
            outbound,
            questioner: None,
            next_id: 1,
        }
    }

    /// This plugin's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Who sent the job currently being handled; `None` for the host
    pub fn questioner(&self) -> Option<&str> {
        self.questioner.as_deref()
    }

    pub(crate) fn set_questioner(&mut self, questioner: Option<String>) {
        self.questioner = questioner;
    }

    /// Fire-and-forget call; returns as soon as the request is sent
    pub fn call_method<A: Serialize>(
        &mut self,
        address: impl Into<Address>,
        args: A,
    ) -> RuntimeResult<()> {
        let call = Call::new(self.next_id(), address.into(), &args)?;
        debug!("{} -> method {}", self.name, call.address);
        self.send(&Envelope::Method(call))
    }

    /// Call a function and block until its value arrives
    pub fn call_function<R: DeserializeOwned, A: Serialize>(
        &mut self,
        address: impl Into<Address>,
        args: A,
    ) -> RuntimeResult<R> {
        let value = self.call_function_raw(address, args)?;
        Ok(value.decode()?)
    }

    /// Call a function and return its still-encoded value.
    ///
    /// Blocks the worker thread with no timeout. If the callee (directly or
    /// through others) calls back into this plugin before answering, neither
    /// side can make progress.
    pub fn call_function_raw<A: Serialize>(
        &mut self,
        address: impl Into<Address>,
        args: A,
    ) -> RuntimeResult<Payload> {
        // Clear any answer left over from an earlier call
        while let Some(stale) = self.outbound.try_recv().map_err(disconnected)? {
            warn!("{} discarding stale {:?}", self.name, stale.kind());
        }

        let call = Call::new(self.next_id(), address.into(), &args)?;
        let id = call.id;
        debug!("{} -> function {} (call {})", self.name, call.address, id);
        self.send(&Envelope::Function(call))?;

        loop {
            match self.outbound.recv().map_err(disconnected)? {
                Some(Envelope::Result(reply)) if reply.call.id == id => return Ok(reply.value),
                Some(Envelope::Error(fault)) if fault.call_id == id => {
                    return Err(RuntimeError::Routing(fault.message));
                }
                Some(other) => {
                    warn!(
                        "{} ignoring {:?} while waiting for call {}",
                        self.name,
                        other.kind(),
                        id
                    );
                }
                None => return Err(RuntimeError::Disconnected),
            }
        }
    }

    /// Broadcast an event to whoever subscribed to it on this plugin
    pub fn signal_event<A: Serialize>(&mut self, name: &str, args: A) -> RuntimeResult<()> {
        let call = Call::new(self.next_id(), Address::local(name), &args)?;
        debug!("{} -> event {}", self.name, name);
        self.send(&Envelope::Event(call))
    }

    pub(crate) fn send(&mut self, envelope: &Envelope) -> RuntimeResult<()> {
        self.outbound.send(envelope).map_err(disconnected)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn disconnected(err: EnvelopeError) -> RuntimeError {
    match err {
        EnvelopeError::Closed => RuntimeError::Disconnected,
        EnvelopeError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            RuntimeError::Disconnected
        }
        other => RuntimeError::Envelope(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_envelope::{Fault, Reply};
    use std::thread;

    #[test]
    fn test_call_method_is_fire_and_forget() {
        let (outbound, mut host) = Channel::pair().unwrap();
        let mut ctx = PluginContext::new("a", outbound);

        ctx.call_method(("b", "note"), ("hello",)).unwrap();

        let Some(Envelope::Method(call)) = host.recv().unwrap() else {
            panic!("expected method");
        };
        assert_eq!(call.address, Address::plugin("b", "note"));
        assert_eq!(call.questioner, None);
        assert_eq!(call.args.decode::<(String,)>().unwrap().0, "hello");
    }

    #[test]
    fn test_call_function_skips_stale_and_foreign_answers() {
        let (outbound, mut host) = Channel::pair().unwrap();
        let mut ctx = PluginContext::new("a", outbound);

        // A stale answer already waiting before the call is made
        let stale = Call::new(99, Address::plugin("b", "old"), &()).unwrap();
        host.send(&Envelope::Result(Reply {
            call: stale,
            value: Payload::encode(&"stale").unwrap(),
        }))
        .unwrap();

        let server = thread::spawn(move || {
            let Some(Envelope::Function(call)) = host.recv().unwrap() else {
                panic!("expected function");
            };
            let (a, b): (i64, i64) = call.args.decode().unwrap();
            let foreign = Call::new(call.id + 100, call.address.clone(), &()).unwrap();
            host.send(&Envelope::Result(Reply {
                call: foreign,
                value: Payload::encode(&-1).unwrap(),
            }))
            .unwrap();
            host.send(&Envelope::Result(Reply {
                call,
                value: Payload::encode(&(a + b)).unwrap(),
            }))
            .unwrap();
            host
        });

        let sum: i64 = ctx.call_function(("b", "add"), (2, 3)).unwrap();
        assert_eq!(sum, 5);
        server.join().unwrap();
    }

    #[test]
    fn test_call_function_error_envelope() {
        let (outbound, mut host) = Channel::pair().unwrap();
        let mut ctx = PluginContext::new("a", outbound);

        let server = thread::spawn(move || {
            let Some(Envelope::Function(call)) = host.recv().unwrap() else {
                panic!("expected function");
            };
            host.send(&Envelope::Error(Fault {
                call_id: call.id,
                message: "unknown plugin 'ghost'".to_string(),
            }))
            .unwrap();
            host
        });

        let err = ctx
            .call_function::<i64, _>(("ghost", "anything"), ())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Routing(ref m) if m.contains("ghost")));
        server.join().unwrap();
    }

    #[test]
    fn test_call_function_host_gone() {
        let (outbound, host) = Channel::pair().unwrap();
        let mut ctx = PluginContext::new("a", outbound);
        host.shutdown();
        drop(host);

        let err = ctx.call_function::<i64, _>(("b", "add"), (1, 1)).unwrap_err();
        assert!(matches!(err, RuntimeError::Disconnected), "got {err:?}");
    }

    #[test]
    fn test_signal_event_uses_bare_name() {
        let (outbound, mut host) = Channel::pair().unwrap();
        let mut ctx = PluginContext::new("a", outbound);

        ctx.signal_event("tick", (1, "x")).unwrap();

        let Some(Envelope::Event(call)) = host.recv().unwrap() else {
            panic!("expected event");
        };
        assert_eq!(call.address, Address::local("tick"));
    }
}
