//! Shared host types

use std::io;

use plexus_envelope::EnvelopeError;

/// Host errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    #[error("unknown plugin '{0}'")]
    UnknownPlugin(String),

    #[error("unknown host operation '{0}'")]
    UnknownOperation(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("failed to start plugin: {0}")]
    Spawn(String),

    #[error("handshake with plugin '{name}' failed: {reason}")]
    Handshake { name: String, reason: String },

    #[error("call timed out")]
    Timeout,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
