//! The plugin host: registry, lifecycle and the embedder's call surface

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use plexus_envelope::{Address, Call, Envelope, INITIALIZE, Payload};

use crate::host::listener::{listen_for_answers, listen_for_requests};
use crate::host::process::{self, plugin_name};
use crate::host::{RegistryEntry, Subscription};
use crate::{Error, HostConfig, Result};

type Completion = std::result::Result<Payload, String>;

/// An embedder blocked in `call_function` on `plugin`
struct Waiter {
    plugin: String,
    tx: Sender<Completion>,
}

/// Owns every loaded plugin and routes traffic between them.
///
/// All methods take `&self`; plugins are stored behind `Arc` and looked up
/// by name, and no registry lock is held while talking to a plugin. Loading
/// needs an `Arc<PluginHost>` because the listener threads keep the host
/// alive until their plugin is unloaded, so call [`PluginHost::shutdown`]
/// before dropping the last handle.
pub struct PluginHost {
    config: HostConfig,
    plugins: DashMap<String, Arc<RegistryEntry>>,
    /// Embedder function calls waiting for a result, by call id
    pending: Mutex<HashMap<u64, Waiter>>,
    next_call_id: AtomicU64,
}

impl PluginHost {
    pub fn new(config: HostConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            plugins: DashMap::new(),
            pending: Mutex::new(HashMap::new()),
            next_call_id: AtomicU64::new(1),
        })
    }

    /// Load every plugin listed in the configuration, in order
    pub fn load_configured(self: &Arc<Self>) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(self.config.plugins.len());
        for plugin in &self.config.plugins {
            names.push(self.load_plugin(&plugin.file, &plugin.args)?);
        }
        Ok(names)
    }

    /// Start a plugin executable and register it under its file stem.
    ///
    /// Returns once the plugin is attached and its start gate and
    /// `initialize` call have been sent.
    pub fn load_plugin<A: Serialize + ?Sized>(
        self: &Arc<Self>,
        file: impl AsRef<Path>,
        args: &A,
    ) -> Result<String> {
        let file = file.as_ref();
        let name = plugin_name(file)?;
        let args = Payload::encode(args)?;
        if self.plugins.contains_key(&name) {
            return Err(Error::AlreadyLoaded(name));
        }

        let spawned = process::spawn_plugin(file, &name, &self.config)?;
        let answers = spawned.inbound.try_clone()?;
        let requests = spawned.outbound.try_clone()?;
        let entry = Arc::new(RegistryEntry::new(
            name.clone(),
            file.to_path_buf(),
            args.clone(),
            spawned.child,
            spawned.inbound,
            spawned.outbound,
        ));

        let inserted = match self.plugins.entry(name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
                true
            }
        };
        if !inserted {
            // Lost a race with a concurrent load of the same name
            entry.close_channels();
            if let Some(mut child) = entry.take_process() {
                process::stop_process(&name, &mut child, self.config.stop_timeout());
            }
            return Err(Error::AlreadyLoaded(name));
        }
        entry.set_running(true);

        let started = self.start_listeners(&entry, requests, answers).and_then(|()| {
            entry.deliver(&Envelope::Start(true))?;
            let init = Call::with_payload(self.next_call_id(), Address::local(INITIALIZE), args);
            entry.deliver(&Envelope::Method(init))?;
            Ok(())
        });
        if let Err(e) = started {
            warn!("Could not start plugin {}: {}", name, e);
            let _ = self.unload_plugin(&name);
            return Err(e);
        }

        info!("Loaded plugin {} (pid {})", name, entry.pid());
        Ok(name)
    }

    fn start_listeners(
        self: &Arc<Self>,
        entry: &Arc<RegistryEntry>,
        requests: plexus_envelope::Channel,
        answers: plexus_envelope::Channel,
    ) -> Result<()> {
        let name = entry.name();
        let request_thread = thread::Builder::new()
            .name(format!("{name}-requests"))
            .spawn({
                let host = Arc::clone(self);
                let entry = Arc::clone(entry);
                move || listen_for_requests(host, entry, requests)
            })?;
        entry.attach_threads(vec![request_thread]);

        let answer_thread = thread::Builder::new()
            .name(format!("{name}-answers"))
            .spawn({
                let host = Arc::clone(self);
                let entry = Arc::clone(entry);
                move || listen_for_answers(host, entry, answers)
            })?;
        entry.attach_threads(vec![answer_thread]);
        Ok(())
    }

    /// Stop a plugin and forget it.
    ///
    /// The plugin finishes the jobs queued before the stop. If it has not
    /// exited after `stop_timeout` it is killed. Every subscription it held on
    /// other plugins is dropped, and embedder calls still waiting on it fail
    /// with [`Error::Remote`].
    ///
    /// Only one caller gets to unload a given instance. A concurrent second
    /// unload of the same instance fails with [`Error::UnknownPlugin`].
    pub fn unload_plugin(&self, name: &str) -> Result<()> {
        let Some(entry) = self.entry(name) else {
            warn!("Could not stop unknown plugin {}", name);
            return Err(Error::UnknownPlugin(name.to_string()));
        };
        let Some(mut child) = entry.take_process() else {
            debug!("Plugin {} is already being unloaded", name);
            return Err(Error::UnknownPlugin(name.to_string()));
        };

        if let Err(e) = entry.deliver(&Envelope::Stop) {
            debug!("Could not send stop to {}: {}", name, e);
        }
        entry.set_running(false);
        process::stop_process(name, &mut child, self.config.stop_timeout());

        // The listeners drain what the plugin wrote before it exited
        let current = thread::current().id();
        for handle in entry.take_threads() {
            // A plugin may unload itself through a host operation
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        entry.close_channels();
        self.fail_waiters(name, &format!("plugin '{name}' was unloaded"));

        let mut purged = 0;
        for other in self.plugins.iter() {
            purged += other.value().purge_subscriber(name);
        }
        // A restart may already have registered a new instance under this name
        self.plugins.remove_if(name, |_, current| Arc::ptr_eq(current, &entry));
        info!("Unloaded plugin {} ({} subscriptions dropped)", name, purged);
        Ok(())
    }

    /// Unload a plugin and load it again from the same file with the same
    /// arguments. The new instance starts without subscriptions.
    pub fn restart_plugin(self: &Arc<Self>, name: &str) -> Result<()> {
        let entry = self
            .entry(name)
            .ok_or_else(|| Error::UnknownPlugin(name.to_string()))?;
        let file = entry.file_name().to_path_buf();
        let args = entry.init_args().clone();
        drop(entry);

        self.unload_plugin(name)?;
        self.load_plugin(&file, &args)?;
        Ok(())
    }

    /// Unload every plugin
    pub fn shutdown(&self) {
        let names = self.plugin_list();
        info!("Shutting down {} plugins", names.len());
        for name in names {
            let _ = self.unload_plugin(&name);
        }
    }

    /// Names of the loaded plugins, sorted
    pub fn plugin_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.plugins.contains_key(name)
    }

    pub fn pid(&self, name: &str) -> Option<u32> {
        self.entry(name).map(|e| e.pid())
    }

    /// Subscriptions held on `plugin`'s events
    pub fn subscriptions(&self, plugin: &str) -> Option<Vec<(String, Subscription)>> {
        self.entry(plugin).map(|e| e.subscriptions())
    }

    /// Make `subscriber.callback` receive every `event` that `plugin` signals
    pub fn subscribe_event(
        &self,
        subscriber: &str,
        plugin: &str,
        event: &str,
        callback: &str,
    ) -> Result<()> {
        let entry = self
            .entry(plugin)
            .ok_or_else(|| Error::UnknownPlugin(plugin.to_string()))?;
        entry.add_subscription(event, Subscription::new(subscriber, callback));
        debug!("{} subscribed {} to {}.{}", subscriber, callback, plugin, event);
        Ok(())
    }

    /// Undo one matching `subscribe_event`; `false` if there was none
    pub fn unsubscribe_event(
        &self,
        subscriber: &str,
        plugin: &str,
        event: &str,
        callback: &str,
    ) -> Result<bool> {
        let entry = self
            .entry(plugin)
            .ok_or_else(|| Error::UnknownPlugin(plugin.to_string()))?;
        Ok(entry.remove_subscription(event, &Subscription::new(subscriber, callback)))
    }

    /// Send a method call to a plugin; returns once it is written
    pub fn call_method<A: Serialize + ?Sized>(
        &self,
        address: impl Into<Address>,
        args: &A,
    ) -> Result<()> {
        let (entry, call) = self.prepare(address.into(), args)?;
        entry.deliver(&Envelope::Method(call))?;
        Ok(())
    }

    /// Call a plugin function and wait up to `call_timeout` for its value
    pub fn call_function<R: DeserializeOwned, A: Serialize + ?Sized>(
        &self,
        address: impl Into<Address>,
        args: &A,
    ) -> Result<R> {
        Ok(self.call_function_raw(address, args)?.decode()?)
    }

    pub fn call_function_raw<A: Serialize + ?Sized>(
        &self,
        address: impl Into<Address>,
        args: &A,
    ) -> Result<Payload> {
        let (entry, call) = self.prepare(address.into(), args)?;
        let id = call.id;
        let (tx, rx) = bounded(1);
        let plugin = entry.name().to_string();
        self.pending.lock().insert(id, Waiter { plugin, tx });

        if let Err(e) = entry.deliver(&Envelope::Function(call)) {
            self.pending.lock().remove(&id);
            return Err(e.into());
        }
        drop(entry);

        match rx.recv_timeout(self.config.call_timeout()) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::Remote(message)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                self.pending.lock().remove(&id);
                Err(Error::Timeout)
            }
        }
    }

    fn prepare<A: Serialize + ?Sized>(
        &self,
        address: Address,
        args: &A,
    ) -> Result<(Arc<RegistryEntry>, Call)> {
        let Some(plugin) = address.plugin.as_deref() else {
            return Err(Error::InvalidAddress(format!(
                "{} names no plugin",
                address.method
            )));
        };
        let entry = self
            .entry(plugin)
            .ok_or_else(|| Error::UnknownPlugin(plugin.to_string()))?;
        let call = Call::new(self.next_call_id(), Address::local(address.method), args)?;
        Ok((entry, call))
    }

    /// Look up a plugin without holding the registry lock
    pub(crate) fn entry(&self, name: &str) -> Option<Arc<RegistryEntry>> {
        self.plugins.get(name).map(|e| Arc::clone(e.value()))
    }

    pub(crate) fn next_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Wake the embedder waiting on call `id`, if it is still waiting
    pub(crate) fn complete_call(&self, id: u64, outcome: Completion) {
        match self.pending.lock().remove(&id) {
            Some(waiter) => {
                let _ = waiter.tx.send(outcome);
            }
            None => debug!("No one waiting for call {}, dropping result", id),
        }
    }

    /// Fail every embedder call still waiting on `plugin`
    fn fail_waiters(&self, plugin: &str, message: &str) {
        let mut pending = self.pending.lock();
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, waiter)| waiter.plugin == plugin)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(waiter) = pending.remove(&id) {
                debug!("Failing call {} to {}: {}", id, plugin, message);
                let _ = waiter.tx.send(Err(message.to_string()));
            }
        }
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("plugins", &self.plugin_list())
            .finish()
    }
}
