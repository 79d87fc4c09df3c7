//! Handler wrapper for long-running commands.
//!
//! The wrapped handler acks the command as soon as it has it (the auto-ack
//! path covers handlers that do not ack explicitly), runs the actual work,
//! and reports the outcome back on a dedicated result opcode as an
//! [`AsyncCommandResult`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, warn};

use tether_core::{
    AsyncCommandResult, MessageHandler, OpCode, Service, ServiceExt, ServiceMessage,
};

type CommandFuture = Pin<Box<dyn Future<Output = (Bytes, Result<(), String>)> + Send>>;
type CommandFn = Box<dyn Fn(ServiceMessage) -> CommandFuture + Send + Sync>;

pub struct AsyncCommandHandler {
    service: Arc<dyn Service>,
    result_opcode: OpCode,
    handler: CommandFn,
}

impl AsyncCommandHandler {
    /// Wrap `handler`; its returned command id and outcome are sent to
    /// `result_opcode` through `service` once it completes.
    pub fn new<F, Fut>(service: Arc<dyn Service>, result_opcode: OpCode, handler: F) -> Arc<Self>
    where
        F: Fn(ServiceMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (Bytes, Result<(), String>)> + Send + 'static,
    {
        Arc::new(Self {
            service,
            result_opcode,
            handler: Box::new(move |message| Box::pin(handler(message))),
        })
    }
}

#[async_trait]
impl MessageHandler for AsyncCommandHandler {
    async fn handle_message(&self, message: ServiceMessage) {
        // Run the command off the dispatch loop: the result send below waits
        // for an ack that the same loop has to read.
        let future = (self.handler)(message);
        let service = self.service.clone();
        let result_opcode = self.result_opcode;

        tokio::spawn(async move {
            let (command_id, outcome) = future.await;

            let result = match outcome {
                Ok(()) => AsyncCommandResult::ok(command_id),
                Err(err) => {
                    warn!(error = %err, "async command failed");
                    AsyncCommandResult::failed(command_id, err)
                }
            };

            if let Err(err) = service.send_payload(result_opcode, &result).await {
                error!(error = %err, opcode = result_opcode, "failed to propagate async command result");
            }
        });
    }
}
