//! Plexus Envelope - the message vocabulary exchanged between the host and
//! plugin processes.
//!
//! Envelopes are the only objects that cross a process boundary. Argument
//! payloads stay encoded from the moment a call is built until a handler
//! asks for them, so the host can forward calls without decoding them.

mod address;
mod channel;
mod codec;
mod envelope;
mod error;
mod payload;

pub use address::*;
pub use channel::*;
pub use codec::*;
pub use envelope::*;
pub use error::*;
pub use payload::*;
