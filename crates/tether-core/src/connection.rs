use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::ConnectionError;
use crate::frame::Message;

/// A full-duplex message transport.
///
/// Implementations front an outbound queue and an inbound queue; the actual
/// socket plumbing (dialing, reconnecting, accepting) lives behind this
/// trait so the service layer is transport-agnostic and tests can swap in an
/// in-memory double.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Enqueue an outbound message. The queue is unbounded and ordered:
    /// enqueue order is wire order within a connection incarnation.
    fn write_message(&self, message: Message);

    /// Next inbound message, in wire order. Returns `None` once the
    /// connection is terminally closed and the inbound queue is drained.
    async fn read_message(&self) -> Option<Message>;

    /// Subscribe to fatal connection events (stream death, protocol
    /// corruption). Transient errors are retried internally and never
    /// surface here.
    fn errors(&self) -> broadcast::Receiver<ConnectionError>;
}

#[async_trait]
impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn write_message(&self, message: Message) {
        (**self).write_message(message)
    }

    async fn read_message(&self) -> Option<Message> {
        (**self).read_message().await
    }

    fn errors(&self) -> broadcast::Receiver<ConnectionError> {
        (**self).errors()
    }
}
