/// Errors raised while encoding, decoding or transporting envelopes
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("Payload decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unknown frame kind: {0}")]
    UnknownKind(u8),

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Channel closed")]
    Closed,
}

/// Result type for envelope operations
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
