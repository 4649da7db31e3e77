use plexus_envelope::EnvelopeError;

/// Errors surfaced by the runtime and by the outward call primitives
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Envelope error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Channel to host closed")]
    Disconnected,

    #[error("Call failed: {0}")]
    Routing(String),

    #[error("Worker crashed: {0}")]
    WorkerCrashed(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Result type for runtime operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Outcome of dispatching one job to a handler
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Unknown method '{0}'")]
    UnknownMethod(String),

    #[error("Wrong arguments for '{method}': {source}")]
    ArgumentMismatch {
        method: String,
        #[source]
        source: EnvelopeError,
    },

    #[error("Handler '{method}' failed: {error:#}")]
    Fault { method: String, error: anyhow::Error },
}

impl HandlerError {
    /// Whether this error ends the worker
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HandlerError::UnknownMethod(_))
    }
}
