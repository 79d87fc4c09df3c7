//! Send-dedup decorator for idempotent state-sync opcodes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use tether_core::{ErrorHandler, MessageHandler, OpCode, Service, ServiceError};

enum CacheEntry {
    /// A send with this payload is on the wire; identical callers queue up
    /// for its outcome instead of sending again.
    InFlight {
        payload: Bytes,
        waiters: Vec<oneshot::Sender<Result<(), ServiceError>>>,
    },
    /// The last send on this opcode acked successfully with this payload.
    Acked { payload: Bytes },
}

/// Decorator around a [`Service`] that suppresses repeat sends of an
/// identical `(opcode, payload)` pair: while the first one is in flight,
/// identical callers wait for its outcome; once it acked, identical sends
/// return immediately. A failed send clears the slot so callers can retry,
/// and a different payload on the same opcode always goes out.
pub struct CachingService {
    inner: Arc<dyn Service>,
    cache: Mutex<HashMap<OpCode, CacheEntry>>,
}

impl CachingService {
    pub fn wrap(inner: Arc<dyn Service>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        })
    }
}

/// Wrap `service` in a [`CachingService`], erasing the concrete type; the
/// shape connection pools expect from a service wrapper.
pub fn with_caching(service: Arc<dyn Service>) -> Arc<dyn Service> {
    CachingService::wrap(service)
}

enum SendPlan {
    /// This caller owns the actual send.
    Send,
    /// An identical send is in flight; wait for its outcome.
    Join(oneshot::Receiver<Result<(), ServiceError>>),
    /// An identical send already acked.
    Done,
}

#[async_trait]
impl Service for CachingService {
    async fn send_and_wait_for_ack(&self, opcode: OpCode, payload: Bytes) -> Result<(), ServiceError> {
        let plan = {
            let mut cache = self.cache.lock();
            let joined = match cache.get_mut(&opcode) {
                Some(CacheEntry::Acked { payload: last }) if *last == payload => Some(SendPlan::Done),
                Some(CacheEntry::InFlight { payload: last, waiters }) if *last == payload => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(SendPlan::Join(rx))
                }
                _ => None,
            };
            joined.unwrap_or_else(|| {
                cache.insert(
                    opcode,
                    CacheEntry::InFlight {
                        payload: payload.clone(),
                        waiters: Vec::new(),
                    },
                );
                SendPlan::Send
            })
        };

        match plan {
            SendPlan::Done => Ok(()),
            SendPlan::Join(rx) => rx.await.unwrap_or(Err(ServiceError::Shutdown)),
            SendPlan::Send => {
                let result = self.inner.send_and_wait_for_ack(opcode, payload.clone()).await;

                let waiters = {
                    let mut cache = self.cache.lock();
                    let waiters = match cache.remove(&opcode) {
                        Some(CacheEntry::InFlight { payload: current, waiters }) if current == payload => waiters,
                        // A racing send with a newer payload owns the slot
                        // now; put its entry back untouched.
                        Some(entry) => {
                            cache.insert(opcode, entry);
                            Vec::new()
                        }
                        None => Vec::new(),
                    };
                    if result.is_ok() {
                        cache
                            .entry(opcode)
                            .or_insert(CacheEntry::Acked { payload });
                    }
                    waiters
                };

                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
                result
            }
        }
    }

    fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.inner.set_message_handler(handler);
    }

    fn set_error_handler(&self, handler: Arc<dyn ErrorHandler>) {
        self.inner.set_error_handler(handler);
    }
}
