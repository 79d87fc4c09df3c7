//! Service facade over a reconnecting client connection.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use tether_core::{ErrorHandler, MessageHandler, OpCode, Service, ServiceError};
use tether_service::ControlService;

use crate::client::{BackoffPolicy, ClientConnection};
use crate::dial::Dialer;
use crate::errors::DialError;

/// A dialed control channel. In-flight ack waiters die with their connection
/// incarnation, but queued outbound messages ride across reconnects.
pub struct ControlClient {
    service: Arc<ControlService>,
    connection: Arc<ClientConnection>,
}

impl ControlClient {
    /// Resolves after the supervisor and connection loops have terminated.
    pub async fn closed(&self) {
        self.connection.closed().await
    }

    pub fn connection(&self) -> &Arc<ClientConnection> {
        &self.connection
    }
}

/// Dial `target` and keep the channel alive until `cancel` fires. Returns
/// after the first successful dial.
pub async fn start_control_client(
    cancel: CancellationToken,
    dialer: Arc<dyn Dialer>,
    target: impl Into<String>,
) -> Result<ControlClient, DialError> {
    let cancel = cancel.child_token();
    let connection =
        ClientConnection::connect(cancel.clone(), dialer, target, BackoffPolicy::default()).await?;
    let service = ControlService::new(cancel, connection.clone());

    Ok(ControlClient { service, connection })
}

#[async_trait]
impl Service for ControlClient {
    async fn send_and_wait_for_ack(&self, opcode: OpCode, payload: Bytes) -> Result<(), ServiceError> {
        self.service.send_and_wait_for_ack(opcode, payload).await
    }

    fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.service.set_message_handler(handler)
    }

    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.service.set_error_handler(handler)
    }
}
