//! Frame codec for envelopes
//!
//! Format: `[length: 4 bytes BE][kind: 1 byte][body: length-1 bytes]`.
//! Bodies are JSON; `Stop` has an empty body.

use std::io::{ErrorKind, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Envelope, EnvelopeError, EnvelopeKind, EnvelopeResult};

/// Upper bound for a single frame
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Write one envelope as a frame and flush
pub fn write_frame<W: Write>(mut w: W, envelope: &Envelope) -> EnvelopeResult<()> {
    let body = encode_body(envelope)?;
    let len = 1 + body.len();
    if len > MAX_FRAME_LEN {
        return Err(EnvelopeError::FrameTooLarge(len));
    }

    w.write_all(&(len as u32).to_be_bytes())?;
    w.write_all(&[envelope.kind() as u8])?;
    w.write_all(&body)?;
    w.flush()?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream on a frame boundary.
pub fn read_frame<R: Read>(mut r: R) -> EnvelopeResult<Option<Envelope>> {
    let mut len_buf = [0u8; 4];
    loop {
        match r.read(&mut len_buf[..1]) {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    // A stream cut inside the length prefix is not a clean close
    r.read_exact(&mut len_buf[1..])?;
    read_frame_body(len_buf, r).map(Some)
}

/// Finish reading a frame whose length prefix has already been consumed
pub(crate) fn read_frame_body<R: Read>(len_buf: [u8; 4], mut r: R) -> EnvelopeResult<Envelope> {
    let len = u32::from_be_bytes(len_buf) as usize;
    if len == 0 {
        return Err(EnvelopeError::EmptyFrame);
    }
    if len > MAX_FRAME_LEN {
        return Err(EnvelopeError::FrameTooLarge(len));
    }

    let mut kind_buf = [0u8; 1];
    r.read_exact(&mut kind_buf)?;
    let kind = EnvelopeKind::try_from(kind_buf[0])?;

    let mut body = vec![0u8; len - 1];
    if !body.is_empty() {
        r.read_exact(&mut body)?;
    }

    decode_body(kind, &body)
}

fn encode_body(envelope: &Envelope) -> EnvelopeResult<Vec<u8>> {
    match envelope {
        Envelope::Start(proceed) => to_json(proceed),
        Envelope::Attach(role) => to_json(role),
        Envelope::Method(call) | Envelope::Function(call) | Envelope::Event(call) => to_json(call),
        Envelope::Result(reply) => to_json(reply),
        Envelope::Error(fault) => to_json(fault),
        Envelope::Stop => Ok(Vec::new()),
    }
}

fn decode_body(kind: EnvelopeKind, body: &[u8]) -> EnvelopeResult<Envelope> {
    Ok(match kind {
        EnvelopeKind::Start => Envelope::Start(from_json(body)?),
        EnvelopeKind::Attach => Envelope::Attach(from_json(body)?),
        EnvelopeKind::Method => Envelope::Method(from_json(body)?),
        EnvelopeKind::Function => Envelope::Function(from_json(body)?),
        EnvelopeKind::Event => Envelope::Event(from_json(body)?),
        EnvelopeKind::Result => Envelope::Result(from_json(body)?),
        EnvelopeKind::Error => Envelope::Error(from_json(body)?),
        EnvelopeKind::Stop => Envelope::Stop,
    })
}

fn to_json<T: Serialize>(value: &T) -> EnvelopeResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(EnvelopeError::Encode)
}

fn from_json<T: DeserializeOwned>(body: &[u8]) -> EnvelopeResult<T> {
    serde_json::from_slice(body).map_err(EnvelopeError::Decode)
}
