use serde::{Deserialize, Serialize};

use crate::{Address, EnvelopeResult, Payload};

/// Name of the lifecycle method the host sends right after the start gate
pub const INITIALIZE: &str = "initialize";

/// Body shared by `Method`, `Function` and `Event` envelopes.
///
/// For an `Event` the address carries the event name in `method` and no
/// plugin. `questioner` is filled in by the host when it forwards the call;
/// senders leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: u64,
    pub address: Address,
    pub args: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questioner: Option<String>,
}

impl Call {
    pub fn new<A: Serialize + ?Sized>(id: u64, address: Address, args: &A) -> EnvelopeResult<Self> {
        Ok(Self {
            id,
            address,
            args: Payload::encode(args)?,
            questioner: None,
        })
    }

    pub fn with_payload(id: u64, address: Address, args: Payload) -> Self {
        Self {
            id,
            address,
            args,
            questioner: None,
        }
    }
}

/// Body of a `Result` envelope: the answered call and the encoded value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub call: Call,
    pub value: Payload,
}

/// Body of an `Error` envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub call_id: u64,
    pub message: String,
}

/// Which of a plugin's two duplex channels a connection carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelRole {
    /// Jobs into the plugin, results of the plugin's own functions out of it
    Inbound,
    /// Requests out of the plugin, results of its calls back into it
    Outbound,
}

/// A routed message
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Two-phase start gate sent once before any job
    Start(bool),
    /// First frame on a freshly connected channel
    Attach(ChannelRole),
    /// Fire-and-forget call
    Method(Call),
    /// Call expecting exactly one `Result`
    Function(Call),
    /// Broadcast notification, routed through subscriptions only
    Event(Call),
    /// Answer to a `Function`
    Result(Reply),
    /// Orderly shutdown request
    Stop,
    /// The call could not be routed or executed
    Error(Fault),
}

impl Envelope {
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Start(_) => EnvelopeKind::Start,
            Envelope::Attach(_) => EnvelopeKind::Attach,
            Envelope::Method(_) => EnvelopeKind::Method,
            Envelope::Function(_) => EnvelopeKind::Function,
            Envelope::Event(_) => EnvelopeKind::Event,
            Envelope::Result(_) => EnvelopeKind::Result,
            Envelope::Stop => EnvelopeKind::Stop,
            Envelope::Error(_) => EnvelopeKind::Error,
        }
    }

    /// The call carried by a `Method`, `Function` or `Event`
    pub fn call(&self) -> Option<&Call> {
        match self {
            Envelope::Method(call) | Envelope::Function(call) | Envelope::Event(call) => Some(call),
            _ => None,
        }
    }
}

/// Frame kind byte on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    // Control
    Start = 1,
    Attach = 2,

    // Calls
    Method = 10,
    Function = 11,
    Event = 12,

    // Answers
    Result = 20,
    Error = 21,

    // Lifecycle
    Stop = 30,
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = crate::EnvelopeError;

    fn try_from(value: u8) -> Result<Self, crate::EnvelopeError> {
        match value {
            1 => Ok(EnvelopeKind::Start),
            2 => Ok(EnvelopeKind::Attach),
            10 => Ok(EnvelopeKind::Method),
            11 => Ok(EnvelopeKind::Function),
            12 => Ok(EnvelopeKind::Event),
            20 => Ok(EnvelopeKind::Result),
            21 => Ok(EnvelopeKind::Error),
            30 => Ok(EnvelopeKind::Stop),
            _ => Err(crate::EnvelopeError::UnknownKind(value)),
        }
    }
}
