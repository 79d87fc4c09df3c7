use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use tether_core::{MessageHandler, OpCode, ServiceMessage};

/// Dispatch inbound messages to per-opcode handlers.
///
/// A message with no registered route is acked with an error, so the sender's
/// `send_and_wait_for_ack` fails instead of timing out.
#[derive(Default)]
pub struct MessageRouter {
    routes: HashMap<OpCode, Arc<dyn MessageHandler>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, opcode: OpCode, handler: Arc<dyn MessageHandler>) -> Self {
        self.routes.insert(opcode, handler);
        self
    }
}

impl FromIterator<(OpCode, Arc<dyn MessageHandler>)> for MessageRouter {
    fn from_iter<I: IntoIterator<Item = (OpCode, Arc<dyn MessageHandler>)>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl MessageHandler for MessageRouter {
    async fn handle_message(&self, message: ServiceMessage) {
        match self.routes.get(&message.opcode()) {
            Some(handler) => handler.handle_message(message).await,
            None => {
                warn!(opcode = message.opcode(), "no handler registered for opcode");
                let opcode = message.opcode();
                message.ack_with_error(format_args!("no handler registered for opcode {opcode}"));
            }
        }
    }
}
