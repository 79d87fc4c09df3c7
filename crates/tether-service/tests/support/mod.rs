//! In-memory connection double for service-layer tests.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};

use tether_core::{Connection, ConnectionError, Message};

pub struct MockConnection {
    outbound: Mutex<Vec<Message>>,
    outbound_notify: Notify,
    inbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>,
    errors_tx: broadcast::Sender<ConnectionError>,
}

impl MockConnection {
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (errors_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            outbound: Mutex::new(Vec::new()),
            outbound_notify: Notify::new(),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            errors_tx,
        })
    }

    /// Feed a frame to the service under test.
    pub fn push_inbound(&self, message: Message) {
        self.inbound_tx.send(message).expect("inbound channel closed");
    }

    /// Publish a fatal connection event.
    pub fn push_error(&self, error: ConnectionError) {
        let _ = self.errors_tx.send(error);
    }

    /// Wait until at least `n` outbound frames were written, then return a
    /// snapshot of all of them.
    pub async fn wait_outbound(&self, n: usize) -> Vec<Message> {
        loop {
            {
                let outbound = self.outbound.lock();
                if outbound.len() >= n {
                    return outbound.clone();
                }
            }
            tokio::select! {
                _ = self.outbound_notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    panic!("timed out waiting for {n} outbound messages");
                }
            }
        }
    }

    pub fn outbound_snapshot(&self) -> Vec<Message> {
        self.outbound.lock().clone()
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn write_message(&self, message: Message) {
        self.outbound.lock().push(message);
        self.outbound_notify.notify_one();
    }

    async fn read_message(&self) -> Option<Message> {
        self.inbound_rx.lock().await.recv().await
    }

    fn errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.errors_tx.subscribe()
    }
}
