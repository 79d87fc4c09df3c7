//! The symmetric service surface: send-and-wait-for-ack plus handler
//! registration. Both ends of a control connection expose the same trait;
//! "client" and "server" only differ in how the underlying connection is
//! established.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::connection::Connection;
use crate::error::{ConnectionError, PayloadError, ServiceError};
use crate::frame::{Message, OpCode};

/// Anything that can marshal itself into a frame payload.
pub trait Payload {
    fn encode_payload(&self) -> Result<Bytes, PayloadError>;
}

impl Payload for Bytes {
    fn encode_payload(&self) -> Result<Bytes, PayloadError> {
        Ok(self.clone())
    }
}

impl Payload for &str {
    fn encode_payload(&self) -> Result<Bytes, PayloadError> {
        Ok(Bytes::copy_from_slice(self.as_bytes()))
    }
}

/// Handler for inbound non-Ack messages. Single-slot and replaceable at any
/// time; dispatch order matches wire order.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, message: ServiceMessage);
}

/// Sink for asynchronous connection errors (the events a blocked
/// `send_and_wait_for_ack` caller would otherwise never see).
pub trait ErrorHandler: Send + Sync {
    fn handle_error(&self, error: &ConnectionError);
}

/// The public control-channel surface.
#[async_trait]
pub trait Service: Send + Sync {
    /// Send `payload` under `opcode` with the requires-ack flag set and
    /// suspend until the peer acks, the peer acks with an error, or the
    /// connection incarnation carrying the request dies.
    async fn send_and_wait_for_ack(&self, opcode: OpCode, payload: Bytes) -> Result<(), ServiceError>;

    /// Install the handler for inbound non-Ack messages.
    fn set_message_handler(&self, handler: Arc<dyn MessageHandler>);

    /// Install the sink for asynchronous connection errors.
    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>);
}

/// Marshalling convenience over [`Service`].
#[async_trait]
pub trait ServiceExt: Service {
    /// Marshal `payload` and send it with `send_and_wait_for_ack`.
    async fn send_payload<P>(&self, opcode: OpCode, payload: &P) -> Result<(), ServiceError>
    where
        P: Payload + Sync + ?Sized,
    {
        let bytes = payload.encode_payload()?;
        self.send_and_wait_for_ack(opcode, bytes).await
    }
}

impl<S: Service + ?Sized> ServiceExt for S {}

/// An inbound message handed to a [`MessageHandler`], bundling the frame with
/// a one-shot acknowledgement.
///
/// `ack`/`ack_with_error` consume the message, so an acknowledgement can be
/// sent at most once. If the handler returns without acking a requires-ack
/// message, a success Ack is sent automatically on drop — convenient for
/// handlers that never fail.
pub struct ServiceMessage {
    message: Message,
    ack: AckOnce,
}

impl ServiceMessage {
    pub fn new(message: Message, connection: Arc<dyn Connection>) -> Self {
        let ack = AckOnce {
            connection,
            uuid: message.uuid(),
            auto: message.requires_ack(),
        };
        Self { message, ack }
    }

    pub fn opcode(&self) -> OpCode {
        self.message.opcode()
    }

    pub fn flags(&self) -> u8 {
        self.message.flags()
    }

    pub fn uuid(&self) -> uuid::Uuid {
        self.message.uuid()
    }

    pub fn payload(&self) -> &Bytes {
        self.message.payload()
    }

    pub fn requires_ack(&self) -> bool {
        self.message.requires_ack()
    }

    /// Acknowledge success.
    pub fn ack(mut self) {
        self.ack.fire(Bytes::new());
    }

    /// Acknowledge with an error; the message surfaces to the sender as
    /// `ServiceError::Ack`.
    pub fn ack_with_error(mut self, error: impl std::fmt::Display) {
        self.ack.fire(Bytes::from(error.to_string()));
    }
}

impl std::fmt::Debug for ServiceMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMessage")
            .field("opcode", &self.message.opcode())
            .field("uuid", &self.message.uuid())
            .field("length", &self.message.length())
            .finish()
    }
}

struct AckOnce {
    connection: Arc<dyn Connection>,
    uuid: uuid::Uuid,
    /// Still owes an ack: the frame required one and none was sent yet.
    auto: bool,
}

impl AckOnce {
    fn fire(&mut self, payload: Bytes) {
        self.auto = false;
        self.connection.write_message(Message::ack(self.uuid, payload));
    }
}

impl Drop for AckOnce {
    fn drop(&mut self) {
        if self.auto {
            self.connection.write_message(Message::ack(self.uuid, Bytes::new()));
        }
    }
}

/// Adapt a plain closure into a [`MessageHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(ServiceMessage) + Send + Sync + 'static,
{
    struct FnHandler<F>(F);

    #[async_trait]
    impl<F> MessageHandler for FnHandler<F>
    where
        F: Fn(ServiceMessage) + Send + Sync,
    {
        async fn handle_message(&self, message: ServiceMessage) {
            (self.0)(message)
        }
    }

    Arc::new(FnHandler(f))
}

/// Adapt a plain closure into an [`ErrorHandler`].
pub fn error_handler_fn<F>(f: F) -> Arc<dyn ErrorHandler>
where
    F: Fn(&ConnectionError) + Send + Sync + 'static,
{
    struct FnErrorHandler<F>(F);

    impl<F> ErrorHandler for FnErrorHandler<F>
    where
        F: Fn(&ConnectionError) + Send + Sync,
    {
        fn handle_error(&self, error: &ConnectionError) {
            (self.0)(error)
        }
    }

    Arc::new(FnErrorHandler(f))
}

/// Default handler: does nothing with the message, which still acks
/// requires-ack frames through the auto-ack path.
pub struct NoopMessageHandler;

#[async_trait]
impl MessageHandler for NoopMessageHandler {
    async fn handle_message(&self, _message: ServiceMessage) {}
}
