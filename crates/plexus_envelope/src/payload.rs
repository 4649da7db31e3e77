use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::{EnvelopeError, EnvelopeResult};

/// An encoded argument list or return value.
///
/// The JSON text is produced once by [`Payload::encode`] and kept verbatim;
/// nothing parses it again until [`Payload::decode`] is called by whoever
/// finally consumes it. Positional arguments are encoded as tuples, so
/// `(1, "a")` becomes `[1,"a"]` and `()` becomes `null`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Box<RawValue>);

impl Payload {
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> EnvelopeResult<Self> {
        serde_json::value::to_raw_value(value)
            .map(Self)
            .map_err(EnvelopeError::Encode)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> EnvelopeResult<T> {
        serde_json::from_str(self.0.get()).map_err(EnvelopeError::Decode)
    }

    /// The `null` payload, used for calls without arguments and for
    /// handlers that return nothing
    pub fn null() -> Self {
        Self(RawValue::NULL.to_owned())
    }

    pub fn as_str(&self) -> &str {
        self.0.get()
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::null()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for Payload {}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Payload({})", self.as_str())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
