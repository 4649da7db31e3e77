//! Duplex envelope channel over a Unix-domain stream

use std::io::{ErrorKind, Read};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use crate::codec::{read_frame, read_frame_body, write_frame};
use crate::{ChannelRole, Envelope, EnvelopeError, EnvelopeResult};

/// One end of a duplex channel.
///
/// Sending takes `&mut self` so that a frame is always written whole; share a
/// channel between threads behind a mutex, or split it with [`Channel::try_clone`]
/// into a reading half and a writing half.
#[derive(Debug)]
pub struct Channel {
    stream: UnixStream,
}

impl Channel {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// A connected pair of channel ends inside one process
    pub fn pair() -> EnvelopeResult<(Channel, Channel)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::new(a), Self::new(b)))
    }

    /// Connect to a host socket and announce which channel this connection is
    pub fn connect(path: &Path, role: ChannelRole) -> EnvelopeResult<Channel> {
        let mut channel = Self::new(UnixStream::connect(path)?);
        channel.send(&Envelope::Attach(role))?;
        Ok(channel)
    }

    pub fn send(&mut self, envelope: &Envelope) -> EnvelopeResult<()> {
        write_frame(&mut self.stream, envelope)
    }

    /// Blocking receive; `Ok(None)` means the peer closed the channel
    pub fn recv(&mut self) -> EnvelopeResult<Option<Envelope>> {
        read_frame(&mut self.stream)
    }

    /// Receive a frame only if one has already started arriving.
    ///
    /// Toggles non-blocking mode on the underlying socket, which is shared
    /// with any clones of this channel; do not call it while another clone
    /// is reading.
    pub fn try_recv(&mut self) -> EnvelopeResult<Option<Envelope>> {
        let mut len_buf = [0u8; 4];

        self.stream.set_nonblocking(true)?;
        let first = self.stream.read(&mut len_buf[..1]);
        self.stream.set_nonblocking(false)?;

        match first {
            Ok(0) => Err(EnvelopeError::Closed),
            Ok(_) => {
                self.stream.read_exact(&mut len_buf[1..])?;
                read_frame_body(len_buf, &mut self.stream).map(Some)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Bound blocking reads; a read that times out fails with an IO error
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> EnvelopeResult<()> {
        Ok(self.stream.set_read_timeout(timeout)?)
    }

    /// Another handle to the same channel end
    pub fn try_clone(&self) -> EnvelopeResult<Channel> {
        Ok(Self::new(self.stream.try_clone()?))
    }

    /// Close both directions; blocked readers on either side see EOF
    pub fn shutdown(&self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}
