//! The base connection: one reader loop and one writer loop over a single
//! byte stream, decoupled from the sockets by unbounded FIFO queues.
//!
//! The queues belong to the `BaseConnection`, not to the stream: a client
//! runs many stream incarnations through the same instance across
//! reconnects, and whatever the writer had not put on the wire yet is still
//! waiting, in order, for the next incarnation.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use tether_core::{
    read_message, Connection, ConnectionError, FrameError, Message, DEFAULT_MAX_PAYLOAD,
};

use crate::dial::ControlStream;
use crate::errors::is_transient;
use crate::queue::MessageQueue;

/// Pause before retrying after a transient read/write error.
const TRANSIENT_RETRY_PAUSE: Duration = Duration::from_millis(100);

pub struct BaseConnection {
    cancel: CancellationToken,
    write_queue: Arc<MessageQueue>,
    read_queue: Arc<MessageQueue>,
    errors_tx: broadcast::Sender<ConnectionError>,
    max_payload: usize,
}

impl BaseConnection {
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        Self::with_max_payload(cancel, DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_max_payload(cancel: CancellationToken, max_payload: usize) -> Arc<Self> {
        let (errors_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            cancel,
            write_queue: Arc::new(MessageQueue::new()),
            read_queue: Arc::new(MessageQueue::new()),
            errors_tx,
            max_payload,
        })
    }

    /// A child of the connection scope, for driving one stream incarnation.
    pub fn incarnation_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Drive one stream incarnation: spawn the reader and writer loops and
    /// wait until the stream dies or `incarnation` is cancelled. Either loop
    /// ending cancels the other; the stream is closed on the way out.
    ///
    /// Messages never leave the write queue except over the wire: a failed
    /// write goes back to the queue head for the next incarnation.
    pub async fn consume_stream(&self, incarnation: CancellationToken, stream: Box<dyn ControlStream>) {
        let (read_half, write_half) = tokio::io::split(stream);

        let reader = tokio::spawn(read_loop(
            incarnation.clone(),
            read_half,
            self.read_queue.clone(),
            self.errors_tx.clone(),
            self.max_payload,
        ));
        let writer = tokio::spawn(write_loop(
            incarnation.clone(),
            write_half,
            self.write_queue.clone(),
            self.errors_tx.clone(),
        ));

        let (reader, writer) = tokio::join!(reader, writer);
        if let Err(e) = reader {
            error!(error = %e, "reader task failed");
        }
        if let Err(e) = writer {
            error!(error = %e, "writer task failed");
        }
    }

    /// Terminal shutdown: release read-queue consumers once the last
    /// incarnation is gone. Outbound messages stay queued; whether anything
    /// ever drains them is the owner's business.
    pub fn close_reads(&self) {
        self.read_queue.close();
    }

    /// Publish a reset event for a teardown the loops themselves did not
    /// observe, so in-flight ack waiters fail instead of hanging.
    pub fn notify_reset(&self, reason: &str) {
        let _ = self.errors_tx.send(ConnectionError::Reset(reason.to_string()));
    }

    /// Number of outbound messages not yet on the wire.
    pub fn outbound_backlog(&self) -> usize {
        self.write_queue.len()
    }
}

#[async_trait]
impl Connection for BaseConnection {
    fn write_message(&self, message: Message) {
        self.write_queue.push(message);
    }

    async fn read_message(&self) -> Option<Message> {
        self.read_queue.pop().await
    }

    fn errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.errors_tx.subscribe()
    }
}

async fn read_loop<R>(
    incarnation: CancellationToken,
    mut reader: R,
    read_queue: Arc<MessageQueue>,
    errors_tx: broadcast::Sender<ConnectionError>,
    max_payload: usize,
) where
    R: tokio::io::AsyncRead + Send + Unpin,
{
    loop {
        let result = tokio::select! {
            _ = incarnation.cancelled() => break,
            result = read_message(&mut reader, max_payload) => result,
        };

        match result {
            Ok(message) => {
                trace!(opcode = message.opcode(), uuid = %message.uuid(), "inbound frame");
                read_queue.push(message);
            }
            Err(FrameError::Io(e)) if is_transient(&e) => {
                warn!(error = %e, "transient read error, retrying");
                tokio::select! {
                    _ = incarnation.cancelled() => break,
                    _ = tokio::time::sleep(TRANSIENT_RETRY_PAUSE) => {}
                }
            }
            Err(err) => {
                // Reads racing our own teardown are expected noise.
                if !incarnation.is_cancelled() {
                    if err.is_corruption() {
                        error!(error = %err, "tearing down corrupt connection");
                    } else {
                        debug!(error = %err, "connection read side ended");
                    }
                    let _ = errors_tx.send((&err).into());
                }
                break;
            }
        }
    }

    incarnation.cancel();
}

async fn write_loop<W>(
    incarnation: CancellationToken,
    mut writer: W,
    write_queue: Arc<MessageQueue>,
    errors_tx: broadcast::Sender<ConnectionError>,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = incarnation.cancelled() => break,
            popped = write_queue.pop() => match popped {
                Some(message) => message,
                None => break,
            },
        };

        let frame = message.encode();
        let result = tokio::select! {
            _ = incarnation.cancelled() => {
                write_queue.push_front(message);
                break;
            }
            result = write_frame(&mut writer, &frame) => result,
        };

        match result {
            Ok(()) => {
                trace!(opcode = message.opcode(), uuid = %message.uuid(), "outbound frame");
            }
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "transient write error, retrying");
                write_queue.push_front(message);
                tokio::select! {
                    _ = incarnation.cancelled() => break,
                    _ = tokio::time::sleep(TRANSIENT_RETRY_PAUSE) => {}
                }
            }
            Err(e) => {
                // The message stays at the head of the queue; a replacement
                // incarnation delivers it before anything newer.
                write_queue.push_front(message);
                if !incarnation.is_cancelled() {
                    debug!(error = %e, "connection write side ended");
                    let _ = errors_tx.send(ConnectionError::Reset(e.to_string()));
                }
                break;
            }
        }
    }

    incarnation.cancel();
    // Best effort: flush a FIN / close_notify. The peer may already be gone.
    let _ = writer.shutdown().await;
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
