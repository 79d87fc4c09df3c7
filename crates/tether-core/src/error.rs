use thiserror::Error;

use crate::frame::PROTOCOL_VERSION;

/// Frame-level decode failures.
///
/// `BadVersion` and `PayloadTooLarge` are protocol corruption: the stream can
/// no longer be trusted and the connection must be torn down. `Io` may be
/// transient; the connection layer decides whether to retry.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("unsupported protocol version {found} (expected {PROTOCOL_VERSION})")]
    BadVersion { found: u8 },

    #[error("payload length {length} exceeds the {cap} byte cap")]
    PayloadTooLarge { length: u32, cap: usize },

    #[error("connection closed by peer")]
    Eof,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Corrupt frames are never recovered; the stream is dead.
    pub fn is_corruption(&self) -> bool {
        matches!(self, FrameError::BadVersion { .. } | FrameError::PayloadTooLarge { .. })
    }
}

/// Payload (un)marshalling failure, reported by [`crate::Payload`]
/// implementations and payload parsers.
#[derive(Debug, Clone, Error)]
#[error("payload codec error: {0}")]
pub struct PayloadError(pub String);

impl PayloadError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Fatal connection events, published on the connection's error channel.
///
/// Cloneable so multiple listeners (service dispatch, user error handlers)
/// can observe the same event.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The underlying stream died: EOF or an unrecoverable i/o error.
    #[error("connection reset: {0}")]
    Reset(String),

    /// The peer sent bytes that cannot be a valid frame.
    #[error("protocol corruption: {0}")]
    Corrupt(String),
}

impl From<&FrameError> for ConnectionError {
    fn from(err: &FrameError) -> Self {
        if err.is_corruption() {
            ConnectionError::Corrupt(err.to_string())
        } else {
            ConnectionError::Reset(err.to_string())
        }
    }
}

/// Errors surfaced to `send_and_wait_for_ack` callers.
///
/// The variants are deliberately distinguishable: an `Ack` is a peer-reported
/// application failure, while `ConnectionReset` means the request may or may
/// not have been processed and the caller owns the retry decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The peer acked with a non-empty payload.
    #[error("ack contained an error: {0}")]
    Ack(String),

    /// The connection incarnation carrying the request died before the ack
    /// arrived.
    #[error("connection reset while waiting for ack")]
    ConnectionReset,

    /// The owning scope was cancelled.
    #[error("service shut down")]
    Shutdown,

    /// Opcode 0 is reserved for acknowledgements.
    #[error("cannot send on the reserved ack opcode")]
    ReservedOpCode,

    /// The outbound payload failed to marshal.
    #[error("payload encoding failed: {0}")]
    Payload(String),
}

impl From<PayloadError> for ServiceError {
    fn from(err: PayloadError) -> Self {
        ServiceError::Payload(err.0)
    }
}
