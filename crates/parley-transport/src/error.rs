//! Error types for the codec and transport layers.

/// Errors produced while decoding provider wire envelopes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The message is not a recognizable envelope (bad JSON, missing
    /// discriminator, undecodable payload).
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// Errors raised by the network session.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session never produced a usable identity.
    #[error("session start failed: {0}")]
    SessionStart(String),

    /// An inbound message could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The underlying socket failed.
    #[error("socket error: {0}")]
    Socket(String),

    /// The peer or the pipeline went away.
    #[error("transport closed")]
    Closed,
}
