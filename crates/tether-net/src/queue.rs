//! Unbounded FIFO message queues backing a connection.
//!
//! A dropping or bounded channel is not acceptable here: the writer loop must
//! be able to put a message *back at the head* when a write fails, so that a
//! replacement connection delivers it first. Reconnect recovery depends on
//! this.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use tether_core::Message;

pub struct MessageQueue {
    inner: Mutex<VecDeque<Message>>,
    notify: Notify,
    closed: AtomicBool,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Append to the tail.
    pub fn push(&self, message: Message) {
        self.inner.lock().push_back(message);
        self.notify.notify_one();
    }

    /// Put a message back at the head, ahead of everything else. Used by the
    /// writer retry path so a failed write keeps its place in line.
    pub fn push_front(&self, message: Message) {
        self.inner.lock().push_front(message);
        self.notify.notify_one();
    }

    /// Pop the head, waiting for one to arrive. Returns `None` once the
    /// queue is closed and fully drained.
    pub async fn pop(&self) -> Option<Message> {
        loop {
            // Register interest before checking so a push between the check
            // and the await cannot be missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.inner.lock();
                if let Some(message) = queue.pop_front() {
                    return Some(message);
                }
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    /// Close the queue: blocked and future `pop` calls drain what is left
    /// and then observe end-of-stream.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn msg(opcode: u8) -> Message {
        Message::request(opcode, Bytes::new())
    }

    #[tokio::test]
    async fn pop_returns_in_fifo_order() {
        let queue = MessageQueue::new();
        queue.push(msg(1));
        queue.push(msg(2));
        queue.push(msg(3));

        assert_eq!(queue.pop().await.unwrap().opcode(), 1);
        assert_eq!(queue.pop().await.unwrap().opcode(), 2);
        assert_eq!(queue.pop().await.unwrap().opcode(), 3);
    }

    #[tokio::test]
    async fn push_front_jumps_the_line() {
        let queue = MessageQueue::new();
        queue.push(msg(1));
        queue.push(msg(2));

        let first = queue.pop().await.unwrap();
        assert_eq!(first.opcode(), 1);
        queue.push_front(first);

        assert_eq!(queue.pop().await.unwrap().opcode(), 1);
        assert_eq!(queue.pop().await.unwrap().opcode(), 2);
    }

    #[tokio::test]
    async fn pop_blocks_until_a_push_arrives() {
        let queue = Arc::new(MessageQueue::new());

        let popper = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!popper.is_finished());

        queue.push(msg(7));
        assert_eq!(popper.await.unwrap().unwrap().opcode(), 7);
    }

    #[tokio::test]
    async fn close_drains_then_signals_end_of_stream() {
        let queue = MessageQueue::new();
        queue.push(msg(1));
        queue.close();

        assert_eq!(queue.pop().await.unwrap().opcode(), 1);
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_releases_blocked_poppers() {
        let queue = Arc::new(MessageQueue::new());

        let popper = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert!(popper.await.unwrap().is_none());
    }
}
