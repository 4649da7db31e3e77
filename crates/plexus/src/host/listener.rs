//! The two listener threads every loaded plugin gets
//!
//! The request listener reads what the plugin sends on its outbound channel
//! (calls, events, its stop acknowledgement) and routes it. The answer
//! listener reads `Result`s from the inbound channel and hands them back to
//! whoever asked.

use std::sync::Arc;

use tracing::{debug, warn};

use plexus_envelope::{Address, Call, Channel, Envelope, EnvelopeError, Fault, Reply};

use crate::host::{PluginHost, RegistryEntry, ops};

pub(crate) fn listen_for_requests(host: Arc<PluginHost>, entry: Arc<RegistryEntry>, mut requests: Channel) {
    loop {
        let request = match requests.recv() {
            Ok(Some(request)) => request,
            Ok(None) => {
                debug!("Plugin {} closed its outbound channel", entry.name());
                break;
            }
            Err(EnvelopeError::Decode(e)) => {
                warn!("Dropping undecodable request from {}: {}", entry.name(), e);
                continue;
            }
            Err(e) => {
                if entry.is_running() {
                    warn!("Request channel of {} failed: {}", entry.name(), e);
                }
                break;
            }
        };

        match request {
            Envelope::Event(event) => fan_out(&host, &entry, event),
            Envelope::Method(call) => route(&host, &entry, call, false),
            Envelope::Function(call) => route(&host, &entry, call, true),
            Envelope::Stop => {
                debug!("Plugin {} acknowledged stop", entry.name());
                entry.set_running(false);
                break;
            }
            other => warn!("Could not process {:?} from {}", other.kind(), entry.name()),
        }
    }
}

pub(crate) fn listen_for_answers(host: Arc<PluginHost>, entry: Arc<RegistryEntry>, mut answers: Channel) {
    loop {
        match answers.recv() {
            Ok(Some(Envelope::Result(reply))) => forward_result(&host, reply),
            Ok(Some(other)) => warn!(
                "Unexpected {:?} on inbound channel of {}",
                other.kind(),
                entry.name()
            ),
            Ok(None) => break,
            Err(EnvelopeError::Decode(e)) => {
                warn!("Dropping undecodable answer from {}: {}", entry.name(), e);
            }
            Err(e) => {
                if entry.is_running() {
                    warn!("Answer channel of {} failed: {}", entry.name(), e);
                }
                break;
            }
        }
    }
    debug!("Answer listener for {} finished", entry.name());
}

/// Deliver an event to every subscriber as a method call on its callback
fn fan_out(host: &PluginHost, emitter: &RegistryEntry, event: Call) {
    let subscribers = emitter.subscribers(&event.address.method);
    debug!(
        "{} signalled {} ({} subscribers)",
        emitter.name(),
        event.address.method,
        subscribers.len()
    );

    for subscription in subscribers {
        let Some(recipient) = host.entry(&subscription.subscriber) else {
            debug!("Subscriber {} is gone", subscription.subscriber);
            continue;
        };
        let call = Call {
            id: host.next_call_id(),
            address: Address::local(&subscription.callback),
            args: event.args.clone(),
            questioner: Some(emitter.name().to_string()),
        };
        if let Err(e) = recipient.deliver(&Envelope::Method(call)) {
            warn!(
                "Could not deliver {} to {}.{}: {}",
                event.address.method, subscription.subscriber, subscription.callback, e
            );
        }
    }
}

/// Route a call to a plugin or to the host; functions always get an answer
fn route(host: &Arc<PluginHost>, sender: &RegistryEntry, mut call: Call, function: bool) {
    let Some(target) = call.address.plugin.clone() else {
        let outcome = ops::execute(host, sender, &call);
        if !function {
            if let Err(e) = outcome {
                warn!("Host method {} from {} failed: {}", call.address.method, sender.name(), e);
            }
            return;
        }
        let answer = match outcome {
            Ok(value) => Envelope::Result(Reply { call, value }),
            Err(e) => Envelope::Error(Fault {
                call_id: call.id,
                message: e.to_string(),
            }),
        };
        if let Err(e) = sender.answer(&answer) {
            warn!("Could not answer {}: {}", sender.name(), e);
        }
        return;
    };

    let Some(recipient) = host.entry(&target) else {
        if function {
            refuse(sender, call.id, format!("unknown plugin '{target}'"));
        } else {
            warn!("Could not pass method request to {} from {}", call.address, sender.name());
        }
        return;
    };

    let id = call.id;
    call.address = Address::local(call.address.method);
    call.questioner = Some(sender.name().to_string());
    let envelope = if function {
        Envelope::Function(call)
    } else {
        Envelope::Method(call)
    };
    if let Err(e) = recipient.deliver(&envelope) {
        warn!("Could not deliver request from {} to {}: {}", sender.name(), target, e);
        if function {
            refuse(sender, id, format!("plugin '{target}' is unreachable"));
        }
    }
}

fn refuse(sender: &RegistryEntry, call_id: u64, message: String) {
    debug!("Refusing call {} from {}: {}", call_id, sender.name(), message);
    let fault = Envelope::Error(Fault { call_id, message });
    if let Err(e) = sender.answer(&fault) {
        warn!("Could not answer {}: {}", sender.name(), e);
    }
}

/// Send a result back to the plugin that asked, or to a waiting embedder
fn forward_result(host: &PluginHost, reply: Reply) {
    match reply.call.questioner.clone() {
        Some(questioner) => match host.entry(&questioner) {
            Some(asker) => {
                if let Err(e) = asker.answer(&Envelope::Result(reply)) {
                    warn!("Could not return result to {}: {}", questioner, e);
                }
            }
            None => debug!("Questioner {} is gone, dropping result", questioner),
        },
        None => host.complete_call(reply.call.id, Ok(reply.value)),
    }
}
