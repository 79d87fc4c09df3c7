//! The service implementation: one correlation map, one dispatch loop, one
//! error loop per connection.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use tether_core::{
    Connection, ConnectionError, ErrorHandler, Message, MessageHandler, NoopMessageHandler,
    OpCode, Service, ServiceError, ServiceMessage, ACK_OPCODE,
};

type AckWaiter = oneshot::Sender<Result<(), ServiceError>>;
type PendingMap = Arc<Mutex<HashMap<Uuid, AckWaiter>>>;

/// [`Service`] over a [`Connection`].
///
/// Owns the pending-ack correlation map and the two background tasks that
/// feed it: the dispatch loop (inbound frames, in wire order) and the error
/// loop (fatal connection events). Both stop when the owning scope is
/// cancelled or the connection closes for good.
pub struct ControlService {
    connection: Arc<dyn Connection>,
    pending: PendingMap,
    handler: Arc<RwLock<Arc<dyn MessageHandler>>>,
    error_handler: Arc<RwLock<Option<Arc<dyn ErrorHandler>>>>,
    cancel: CancellationToken,
}

impl ControlService {
    pub fn new(cancel: CancellationToken, connection: Arc<dyn Connection>) -> Arc<Self> {
        let svc = Arc::new(Self {
            connection: connection.clone(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            handler: Arc::new(RwLock::new(Arc::new(NoopMessageHandler) as Arc<dyn MessageHandler>)),
            error_handler: Arc::new(RwLock::new(None)),
            cancel: cancel.child_token(),
        });

        tokio::spawn(dispatch_loop(
            svc.cancel.clone(),
            connection.clone(),
            svc.pending.clone(),
            svc.handler.clone(),
        ));
        tokio::spawn(error_loop(
            svc.cancel.clone(),
            connection.errors(),
            svc.pending.clone(),
            svc.error_handler.clone(),
        ));

        svc
    }
}

#[async_trait]
impl Service for ControlService {
    async fn send_and_wait_for_ack(&self, opcode: OpCode, payload: Bytes) -> Result<(), ServiceError> {
        if opcode == ACK_OPCODE {
            return Err(ServiceError::ReservedOpCode);
        }

        let message = Message::request(opcode, payload);
        let uuid = message.uuid();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(uuid, tx);

        // If the caller gives up (deadline wrapper, task cancellation) the
        // waiter must leave the map so a late ack is dropped, not misdelivered.
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            uuid,
        };

        self.connection.write_message(message);

        tokio::select! {
            _ = self.cancel.cancelled() => Err(ServiceError::Shutdown),
            resolved = rx => resolved.unwrap_or(Err(ServiceError::Shutdown)),
        }
    }

    fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        *self.handler.write() = handler;
    }

    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        *self.error_handler.write() = Some(handler);
    }
}

impl Drop for ControlService {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PendingGuard {
    pending: PendingMap,
    uuid: Uuid,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.uuid);
    }
}

async fn dispatch_loop(
    cancel: CancellationToken,
    connection: Arc<dyn Connection>,
    pending: PendingMap,
    handler: Arc<RwLock<Arc<dyn MessageHandler>>>,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = connection.read_message() => match maybe {
                Some(message) => message,
                None => break,
            },
        };

        if message.opcode() == ACK_OPCODE {
            resolve_ack(&pending, &message);
        } else {
            // Dispatch inline: handler order must match wire order.
            let current = handler.read().clone();
            current
                .handle_message(ServiceMessage::new(message, connection.clone()))
                .await;
        }
    }

    fail_pending(&pending, ServiceError::Shutdown);
}

fn resolve_ack(pending: &PendingMap, message: &Message) {
    let Some(waiter) = pending.lock().remove(&message.uuid()) else {
        // Duplicate ack, or the waiter already gave up.
        debug!(uuid = %message.uuid(), "dropping ack with no registered waiter");
        return;
    };

    let result = if message.payload().is_empty() {
        Ok(())
    } else {
        Err(ServiceError::Ack(
            String::from_utf8_lossy(message.payload()).into_owned(),
        ))
    };
    // The waiter may have been cancelled after we took it out of the map;
    // nobody left to notify is fine.
    let _ = waiter.send(result);
}

async fn error_loop(
    cancel: CancellationToken,
    mut errors: broadcast::Receiver<ConnectionError>,
    pending: PendingMap,
    error_handler: Arc<RwLock<Option<Arc<dyn ErrorHandler>>>>,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            received = errors.recv() => received,
        };

        match event {
            Ok(error) => {
                // The connection incarnation the in-flight requests were
                // written on is gone; the peer may or may not have processed
                // them, so the callers own the retry decision.
                fail_pending(&pending, ServiceError::ConnectionReset);
                if let Some(handler) = error_handler.read().clone() {
                    handler.handle_error(&error);
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "connection error channel lagged");
                fail_pending(&pending, ServiceError::ConnectionReset);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn fail_pending(pending: &PendingMap, error: ServiceError) {
    let waiters: Vec<AckWaiter> = pending.lock().drain().map(|(_, w)| w).collect();
    for waiter in waiters {
        let _ = waiter.send(Err(error.clone()));
    }
}
