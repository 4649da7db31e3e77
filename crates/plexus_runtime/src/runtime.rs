use std::sync::Arc;
use std::thread;

use tracing::{error, info, warn};

use plexus_envelope::{Channel, Envelope, EnvelopeError};

use crate::worker::Worker;
use crate::{Handlers, JobQueue, Plugin, PluginContext, RuntimeError, RuntimeResult, RuntimeStatus};

/// Drives one plugin object inside its process.
///
/// Two threads: the caller of [`PluginRuntime::run`] reads the inbound
/// channel and queues every envelope; a worker thread pops them one at a
/// time and dispatches them.
pub struct PluginRuntime<P: Plugin> {
    name: String,
    plugin: P,
    inbound: Channel,
    outbound: Channel,
    status: RuntimeStatus,
    queue: Arc<JobQueue>,
}

impl<P: Plugin> PluginRuntime<P> {
    pub fn new(name: impl Into<String>, plugin: P, inbound: Channel, outbound: Channel) -> Self {
        Self {
            name: name.into(),
            plugin,
            inbound,
            outbound,
            status: RuntimeStatus::new(),
            queue: Arc::new(JobQueue::new()),
        }
    }

    /// Handle for observing the worker from another thread
    pub fn status(&self) -> RuntimeStatus {
        self.status.clone()
    }

    /// Run until `Stop` has been received and the worker has finished.
    ///
    /// A worker that dies on a handler fault is not restarted. The receive
    /// loop keeps queueing jobs nobody will process until `Stop` or EOF.
    pub fn run(self) -> RuntimeResult<()> {
        let Self {
            name,
            plugin,
            mut inbound,
            outbound,
            status,
            queue,
        } = self;

        let mut handlers = Handlers::new();
        P::register(&mut handlers);

        let worker = Worker {
            plugin,
            handlers,
            ctx: PluginContext::new(name.clone(), outbound),
            results: inbound.try_clone()?,
            queue: Arc::clone(&queue),
            status,
        };

        let handle = thread::Builder::new()
            .name(format!("{name}-worker"))
            .spawn(move || worker.run())
            .map_err(EnvelopeError::Io)?;

        loop {
            match inbound.recv() {
                Ok(Some(Envelope::Stop)) => {
                    queue.push(Envelope::Stop);
                    break;
                }
                Ok(Some(envelope)) => queue.push(envelope),
                Ok(None) => {
                    info!("Host closed the channel of {}", name);
                    queue.push(Envelope::Stop);
                    break;
                }
                Err(EnvelopeError::Decode(e)) => {
                    warn!("{} dropped an undecodable envelope: {}", name, e);
                }
                Err(e) => {
                    error!("Error reading from host in {}: {}", name, e);
                    queue.push(Envelope::Stop);
                    break;
                }
            }
        }

        match handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RuntimeError::WorkerCrashed(e.to_string())),
            Err(_) => Err(RuntimeError::WorkerCrashed("handler panicked".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, INITIALIZE, Payload, WorkerState};
    use plexus_envelope::Call;
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    /// Records what it was asked to do, and can call out through its context
    #[derive(Default)]
    struct Recorder {
        seen: Vec<i64>,
        init: Option<String>,
        /// How many jobs had run at each `shut_down` call
        shutdowns: Arc<parking_lot::Mutex<Vec<usize>>>,
    }

    impl Plugin for Recorder {
        fn register(handlers: &mut Handlers<Self>) {
            handlers
                .on("record", |me: &mut Recorder, _, (n,): (i64,)| {
                    me.seen.push(n);
                    Ok(())
                })
                .on("seen", |me: &mut Recorder, _, ()| Ok(me.seen.clone()))
                .on("init", |me: &mut Recorder, _, ()| Ok(me.init.clone()))
                .on("who", |_: &mut Recorder, ctx, ()| {
                    Ok(ctx.questioner().map(str::to_string))
                })
                .on("ask", |_: &mut Recorder, ctx, (x,): (i64,)| {
                    let doubled: i64 = ctx.call_function(("other", "double"), (x,))?;
                    Ok(doubled)
                })
                .on("fail", |_: &mut Recorder, _, ()| -> anyhow::Result<()> {
                    anyhow::bail!("deliberate failure")
                })
                .on("panic", |_: &mut Recorder, _, ()| -> anyhow::Result<()> {
                    panic!("deliberate panic")
                });
        }

        fn initialize(&mut self, _ctx: &mut PluginContext, args: Payload) -> anyhow::Result<()> {
            self.init = Some(args.decode()?);
            Ok(())
        }

        fn shut_down(&mut self, _ctx: &mut PluginContext) {
            self.shutdowns.lock().push(self.seen.len());
        }
    }

    struct Harness {
        /// Host end of the inbound channel: jobs in, function results out
        inbound: Channel,
        /// Host end of the outbound channel: requests out, answers in
        outbound: Channel,
        status: RuntimeStatus,
        runtime: JoinHandle<RuntimeResult<()>>,
        shutdowns: Arc<parking_lot::Mutex<Vec<usize>>>,
        next_id: u64,
    }

    impl Harness {
        fn start() -> Self {
            let (inbound, plugin_inbound) = Channel::pair().unwrap();
            let (outbound, plugin_outbound) = Channel::pair().unwrap();
            let recorder = Recorder::default();
            let shutdowns = Arc::clone(&recorder.shutdowns);
            let runtime = PluginRuntime::new("rec", recorder, plugin_inbound, plugin_outbound);
            let status = runtime.status();
            let runtime = thread::spawn(move || runtime.run());
            Self {
                inbound,
                outbound,
                status,
                runtime,
                shutdowns,
                next_id: 1,
            }
        }

        fn call<A: serde::Serialize>(&mut self, method: &str, args: A) -> Call {
            let id = self.next_id;
            self.next_id += 1;
            let mut call = Call::new(id, Address::local(method), &args).unwrap();
            call.questioner = Some("tester".to_string());
            call
        }

        fn method<A: serde::Serialize>(&mut self, method: &str, args: A) {
            let call = self.call(method, args);
            self.inbound.send(&Envelope::Method(call)).unwrap();
        }

        fn function<A: serde::Serialize>(&mut self, method: &str, args: A) -> Payload {
            let call = self.call(method, args);
            let id = call.id;
            self.inbound.send(&Envelope::Function(call)).unwrap();
            match self.inbound.recv().unwrap() {
                Some(Envelope::Result(reply)) => {
                    assert_eq!(reply.call.id, id);
                    reply.value
                }
                other => panic!("expected result, got {other:?}"),
            }
        }

        fn wait_for(&self, state: WorkerState) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.status.state() != state {
                assert!(Instant::now() < deadline, "worker never reached {state:?}");
                thread::sleep(Duration::from_millis(5));
            }
        }
    }

    #[test]
    fn test_jobs_run_in_fifo_order() {
        let mut h = Harness::start();
        for n in 0..50 {
            h.method("record", (n,));
        }
        let seen: Vec<i64> = h.function("seen", ()).decode().unwrap();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());

        h.inbound.send(&Envelope::Stop).unwrap();
        assert_eq!(h.outbound.recv().unwrap(), Some(Envelope::Stop));
        h.runtime.join().unwrap().unwrap();
        assert_eq!(h.status.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_shut_down_runs_once_after_queued_jobs() {
        let mut h = Harness::start();
        for n in 0..10 {
            h.method("record", (n,));
        }
        h.inbound.send(&Envelope::Stop).unwrap();
        // Jobs arriving after the stop are never run
        h.method("record", (99,));

        assert_eq!(h.outbound.recv().unwrap(), Some(Envelope::Stop));
        h.runtime.join().unwrap().unwrap();
        assert_eq!(*h.shutdowns.lock(), vec![10]);
        assert_eq!(h.status.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_shut_down_skipped_after_crash() {
        let mut h = Harness::start();
        h.method("fail", ());
        h.wait_for(WorkerState::Crashed);
        h.inbound.send(&Envelope::Stop).unwrap();
        assert!(h.runtime.join().unwrap().is_err());
        assert!(h.shutdowns.lock().is_empty());
    }

    #[test]
    fn test_initialize_and_questioner() {
        let mut h = Harness::start();
        h.method(INITIALIZE, "config-a");
        let init: Option<String> = h.function("init", ()).decode().unwrap();
        assert_eq!(init.as_deref(), Some("config-a"));

        let who: Option<String> = h.function("who", ()).decode().unwrap();
        assert_eq!(who.as_deref(), Some("tester"));
    }

    #[test]
    fn test_unknown_method_is_dropped() {
        let mut h = Harness::start();
        h.method("nope", (1, 2));
        h.method("record", (7,));
        let seen: Vec<i64> = h.function("seen", ()).decode().unwrap();
        assert_eq!(seen, vec![7]);
        assert_eq!(h.status.state(), WorkerState::Idle);
    }

    #[test]
    fn test_outgoing_function_round_trip() {
        let mut h = Harness::start();
        let call = h.call("ask", (21,));
        h.inbound.send(&Envelope::Function(call)).unwrap();

        // Play the host: answer the plugin's own request on its outbound channel
        let Some(Envelope::Function(request)) = h.outbound.recv().unwrap() else {
            panic!("expected outgoing function");
        };
        assert_eq!(request.address, Address::plugin("other", "double"));
        let (x,): (i64,) = request.args.decode().unwrap();
        h.outbound
            .send(&Envelope::Result(plexus_envelope::Reply {
                call: request,
                value: Payload::encode(&(x * 2)).unwrap(),
            }))
            .unwrap();

        match h.inbound.recv().unwrap() {
            Some(Envelope::Result(reply)) => assert_eq!(reply.value.decode::<i64>().unwrap(), 42),
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn test_handler_fault_stalls_worker() {
        let mut h = Harness::start();
        h.method("fail", ());
        h.wait_for(WorkerState::Crashed);
        assert!(h.status.is_crashed());

        // Still accepted and queued, never processed
        h.method("record", (1,));
        let call = h.call("seen", ());
        h.inbound.send(&Envelope::Function(call)).unwrap();
        h.inbound
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();
        assert!(h.inbound.recv().is_err());

        h.inbound.send(&Envelope::Stop).unwrap();
        let err = h.runtime.join().unwrap().unwrap_err();
        assert!(matches!(err, RuntimeError::WorkerCrashed(_)));
    }

    #[test]
    fn test_argument_mismatch_is_fatal() {
        let mut h = Harness::start();
        h.method("record", ("not a number",));
        h.wait_for(WorkerState::Crashed);
        h.inbound.send(&Envelope::Stop).unwrap();
        assert!(h.runtime.join().unwrap().is_err());
    }

    #[test]
    fn test_panic_is_recorded_and_reraised() {
        let mut h = Harness::start();
        h.method("panic", ());
        h.wait_for(WorkerState::Crashed);
        h.inbound.send(&Envelope::Stop).unwrap();
        let err = h.runtime.join().unwrap().unwrap_err();
        assert!(matches!(err, RuntimeError::WorkerCrashed(ref m) if m.contains("panicked")));
    }

    #[test]
    fn test_host_eof_stops_runtime() {
        let h = Harness::start();
        h.inbound.shutdown();
        drop(h.inbound);
        h.runtime.join().unwrap().unwrap();
        assert_eq!(h.status.state(), WorkerState::Stopped);
    }
}
