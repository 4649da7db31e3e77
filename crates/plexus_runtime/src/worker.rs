use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, error, info, warn};

use plexus_envelope::{Call, Channel, Envelope, Payload, Reply};

use crate::{HandlerError, Handlers, INITIALIZE, JobQueue, Plugin, PluginContext};

/// What the worker thread is doing
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle = 0,
    Busy = 1,
    Stopped = 2,
    /// A handler failed and the worker exited; queued jobs are never drained
    Crashed = 3,
}

impl From<u8> for WorkerState {
    fn from(value: u8) -> Self {
        match value {
            1 => WorkerState::Busy,
            2 => WorkerState::Stopped,
            3 => WorkerState::Crashed,
            _ => WorkerState::Idle,
        }
    }
}

/// Shared view of the worker's state
#[derive(Debug, Clone, Default)]
pub struct RuntimeStatus {
    state: Arc<AtomicU8>,
}

impl RuntimeStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from(self.state.load(Ordering::SeqCst))
    }

    pub fn is_crashed(&self) -> bool {
        self.state() == WorkerState::Crashed
    }

    pub(crate) fn set(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

/// The single thread that turns queued envelopes into handler calls
pub(crate) struct Worker<P: Plugin> {
    pub(crate) plugin: P,
    pub(crate) handlers: Handlers<P>,
    pub(crate) ctx: PluginContext,
    /// Writing half of the inbound channel; function results go back this way
    pub(crate) results: Channel,
    pub(crate) queue: Arc<JobQueue>,
    pub(crate) status: RuntimeStatus,
}

impl<P: Plugin> Worker<P> {
    /// Process jobs until `Stop`, or until a handler fails
    pub(crate) fn run(mut self) -> Result<(), HandlerError> {
        debug!("Worker for {} started", self.ctx.name());

        loop {
            match self.queue.pop() {
                Envelope::Stop => {
                    self.status.set(WorkerState::Stopped);
                    if let Err(e) = self.ctx.send(&Envelope::Stop) {
                        warn!("{} could not acknowledge stop: {}", self.ctx.name(), e);
                    }
                    self.plugin.shut_down(&mut self.ctx);
                    info!("Plugin {} stopped", self.ctx.name());
                    return Ok(());
                }
                Envelope::Method(call) => self.execute(call, false)?,
                Envelope::Function(call) => self.execute(call, true)?,
                other => {
                    warn!("{} cannot process {:?}", self.ctx.name(), other.kind());
                }
            }
        }
    }

    fn execute(&mut self, call: Call, answer: bool) -> Result<(), HandlerError> {
        self.status.set(WorkerState::Busy);
        self.ctx.set_questioner(call.questioner.clone());

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(&call)));
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    "Panic in {} {}.{}{} from {}",
                    kind(answer),
                    self.ctx.name(),
                    call.address.method,
                    call.args,
                    questioner(&call)
                );
                self.status.set(WorkerState::Crashed);
                panic::resume_unwind(panic);
            }
        };

        match outcome {
            Ok(value) => {
                if answer {
                    let reply = Envelope::Result(Reply { call, value });
                    if let Err(e) = self.results.send(&reply) {
                        warn!("{} could not send result: {}", self.ctx.name(), e);
                    }
                }
            }
            Err(HandlerError::UnknownMethod(method)) => {
                warn!(
                    "Unknown {} {}.{}{}",
                    kind(answer),
                    self.ctx.name(),
                    method,
                    call.args
                );
            }
            Err(e) => {
                match &e {
                    HandlerError::ArgumentMismatch { .. } => error!(
                        "Used wrong arguments in {} call {}.{}{} from {}: {}",
                        kind(answer),
                        self.ctx.name(),
                        call.address.method,
                        call.args,
                        questioner(&call),
                        e
                    ),
                    _ => error!(
                        "Exception in {} call {}.{}{} from {}: {}",
                        kind(answer),
                        self.ctx.name(),
                        call.address.method,
                        call.args,
                        questioner(&call),
                        e
                    ),
                }
                self.status.set(WorkerState::Crashed);
                return Err(e);
            }
        }

        self.status.set(WorkerState::Idle);
        Ok(())
    }

    fn dispatch(&mut self, call: &Call) -> Result<Payload, HandlerError> {
        let method = call.address.method.as_str();
        if method == INITIALIZE && !self.handlers.contains(INITIALIZE) {
            return self
                .plugin
                .initialize(&mut self.ctx, call.args.clone())
                .map(|_| Payload::null())
                .map_err(|error| HandlerError::Fault {
                    method: INITIALIZE.to_string(),
                    error,
                });
        }
        self.handlers
            .dispatch(&mut self.plugin, &mut self.ctx, method, &call.args)
    }
}

fn kind(answer: bool) -> &'static str {
    if answer { "function" } else { "method" }
}

fn questioner(call: &Call) -> &str {
    call.questioner.as_deref().unwrap_or("<host>")
}
