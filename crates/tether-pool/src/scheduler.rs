//! Delayed re-delivery of work-queue keys.
//!
//! Consumers like the certificate reconciler want "look at this key again
//! shortly before the leaf expires". The scheduler owns a min-heap of
//! `(fire-at, key)` pairs and hands due keys back to the enqueue callback.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub struct DelayScheduler<K> {
    tx: mpsc::UnboundedSender<(K, Instant)>,
}

impl<K: Send + 'static> DelayScheduler<K> {
    /// Spawn the timer task. Due keys are passed to `deliver` in fire-at
    /// order (insertion order between equal deadlines).
    pub fn new(cancel: CancellationToken, deliver: impl Fn(K) + Send + 'static) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(cancel, rx, deliver));
        Self { tx }
    }

    /// Re-deliver `key` after `delay`.
    pub fn enqueue_after(&self, key: K, delay: Duration) {
        let _ = self.tx.send((key, Instant::now() + delay));
    }
}

async fn run<K>(
    cancel: CancellationToken,
    mut rx: mpsc::UnboundedReceiver<(K, Instant)>,
    deliver: impl Fn(K),
) {
    let mut heap: BinaryHeap<Scheduled<K>> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let next_deadline = heap.peek().map(|scheduled| scheduled.at);

        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some((key, at)) => {
                    heap.push(Scheduled { at, seq, key });
                    seq += 1;
                }
                None => break,
            },
            _ = sleep_until_or_forever(next_deadline) => {
                let now = Instant::now();
                while heap.peek().is_some_and(|scheduled| scheduled.at <= now) {
                    let scheduled = heap.pop().expect("peeked entry is present");
                    deliver(scheduled.key);
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct Scheduled<K> {
    at: Instant,
    seq: u64,
    key: K,
}

// Inverted ordering turns std's max-heap into the min-heap we want.
impl<K> Ord for Scheduled<K> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        (other.at, other.seq).cmp(&(self.at, self.seq))
    }
}

impl<K> PartialOrd for Scheduled<K> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<K> PartialEq for Scheduled<K> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<K> Eq for Scheduled<K> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn fires_after_the_delay() {
        let cancel = CancellationToken::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let scheduler = DelayScheduler::new(cancel.clone(), {
            let fired = fired.clone();
            move |key: &'static str| fired.lock().push(key)
        });

        scheduler.enqueue_after("a", Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(fired.lock().is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        tokio::task::yield_now().await;
        assert_eq!(*fired.lock(), vec!["a"]);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_deadline_order() {
        let cancel = CancellationToken::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let scheduler = DelayScheduler::new(cancel.clone(), {
            let fired = fired.clone();
            move |key: &'static str| fired.lock().push(key)
        });

        scheduler.enqueue_after("late", Duration::from_secs(30));
        scheduler.enqueue_after("early", Duration::from_secs(10));
        scheduler.enqueue_after("middle", Duration::from_secs(20));

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(*fired.lock(), vec!["early", "middle", "late"]);

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_delivery() {
        let cancel = CancellationToken::new();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let scheduler = DelayScheduler::new(cancel.clone(), {
            let fired = fired.clone();
            move |key: &'static str| fired.lock().push(key)
        });

        scheduler.enqueue_after("a", Duration::from_secs(10));
        cancel.cancel();

        tokio::time::sleep(Duration::from_secs(20)).await;
        tokio::task::yield_now().await;
        assert!(fired.lock().is_empty());
    }
}
