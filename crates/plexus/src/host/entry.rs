//! Per-plugin registry record

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use plexus_envelope::{Channel, Envelope, EnvelopeResult, Payload};

/// Someone listening to an event of a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Plugin that receives the callback
    pub subscriber: String,
    /// Method invoked on the subscriber
    pub callback: String,
}

impl Subscription {
    pub fn new(subscriber: impl Into<String>, callback: impl Into<String>) -> Self {
        Self {
            subscriber: subscriber.into(),
            callback: callback.into(),
        }
    }
}

/// Everything the host knows about one loaded plugin.
///
/// Writes to the plugin's inbound channel go through the send lock so that
/// envelopes from different host threads never interleave. The outbound
/// writer is used only to answer the plugin's own `call_function`.
pub struct RegistryEntry {
    name: String,
    file_name: PathBuf,
    init_args: Payload,
    pid: u32,
    send_lock: Mutex<Channel>,
    outbound: Mutex<Channel>,
    /// event name -> subscribers, in subscription order
    listeners: Mutex<HashMap<String, Vec<Subscription>>>,
    running: AtomicBool,
    process: Mutex<Option<Child>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl RegistryEntry {
    pub(crate) fn new(
        name: String,
        file_name: PathBuf,
        init_args: Payload,
        child: Child,
        inbound: Channel,
        outbound: Channel,
    ) -> Self {
        Self {
            name,
            file_name,
            init_args,
            pid: child.id(),
            send_lock: Mutex::new(inbound),
            outbound: Mutex::new(outbound),
            listeners: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            process: Mutex::new(Some(child)),
            threads: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Executable this plugin was started from
    pub fn file_name(&self) -> &Path {
        &self.file_name
    }

    /// Arguments the plugin was initialized with, kept for restarts
    pub fn init_args(&self) -> &Payload {
        &self.init_args
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Write to the plugin's inbound channel
    pub(crate) fn deliver(&self, envelope: &Envelope) -> EnvelopeResult<()> {
        self.send_lock.lock().send(envelope)
    }

    /// Write to the plugin's outbound channel
    pub(crate) fn answer(&self, envelope: &Envelope) -> EnvelopeResult<()> {
        self.outbound.lock().send(envelope)
    }

    /// Close both channels; the listener threads see end of stream
    pub(crate) fn close_channels(&self) {
        self.send_lock.lock().shutdown();
        self.outbound.lock().shutdown();
    }

    pub(crate) fn add_subscription(&self, event: &str, subscription: Subscription) {
        self.listeners
            .lock()
            .entry(event.to_string())
            .or_default()
            .push(subscription);
    }

    /// Remove the first matching subscription
    pub(crate) fn remove_subscription(&self, event: &str, subscription: &Subscription) -> bool {
        let mut listeners = self.listeners.lock();
        let Some(subscribers) = listeners.get_mut(event) else {
            return false;
        };
        let Some(index) = subscribers.iter().position(|s| s == subscription) else {
            return false;
        };
        subscribers.remove(index);
        if subscribers.is_empty() {
            listeners.remove(event);
        }
        true
    }

    /// Snapshot of the subscribers to one event
    pub(crate) fn subscribers(&self, event: &str) -> Vec<Subscription> {
        self.listeners
            .lock()
            .get(event)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every subscription, sorted by event name
    pub fn subscriptions(&self) -> Vec<(String, Subscription)> {
        let listeners = self.listeners.lock();
        let mut all: Vec<_> = listeners
            .iter()
            .flat_map(|(event, subs)| subs.iter().map(|s| (event.clone(), s.clone())))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Drop every subscription held by `subscriber`; returns how many were removed
    pub(crate) fn purge_subscriber(&self, subscriber: &str) -> usize {
        let mut listeners = self.listeners.lock();
        let mut removed = 0;
        listeners.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| s.subscriber != subscriber);
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    pub(crate) fn take_process(&self) -> Option<Child> {
        self.process.lock().take()
    }

    pub(crate) fn attach_threads(&self, handles: Vec<JoinHandle<()>>) {
        self.threads.lock().extend(handles);
    }

    pub(crate) fn take_threads(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.threads.lock())
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("pid", &self.pid)
            .field("running", &self.is_running())
            .finish()
    }
}
