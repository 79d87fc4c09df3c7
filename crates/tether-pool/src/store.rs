//! Last-notification-per-pod store.
//!
//! Data-plane pods push state over the control channel; the reconciler reads
//! the latest value per `(resource, pod)` on its next pass instead of
//! processing a stream. A merger decides how a new notification combines
//! with the stored one, and the resource key is re-enqueued only when the
//! stored state actually changed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::warn;

use tether_core::{MessageHandler, PayloadError, ServiceMessage};

/// Namespaced resource identity, the first half of the store key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Combines the stored value (if any) with a newly received one. Returning
/// `None` removes the entry.
pub type ValueMerger<P> = Arc<dyn Fn(Option<&P>, P) -> Option<P> + Send + Sync>;

/// Merger that always keeps the newest value.
pub fn pass_new_value<P>() -> ValueMerger<P> {
    Arc::new(|_old, new| Some(new))
}

type Parser<P> = Arc<dyn Fn(&Bytes) -> Result<P, PayloadError> + Send + Sync>;
type EnqueueFn = Arc<dyn Fn(ResourceRef) + Send + Sync>;
type Store<P> = Arc<Mutex<HashMap<ResourceRef, HashMap<String, P>>>>;

pub struct NotificationStore<P> {
    enqueue_key: EnqueueFn,
    parser: Parser<P>,
    store: Store<P>,
}

impl<P> NotificationStore<P>
where
    P: Clone + PartialEq + Send + Sync + 'static,
{
    pub fn new(
        enqueue_key: impl Fn(ResourceRef) + Send + Sync + 'static,
        parser: impl Fn(&Bytes) -> Result<P, PayloadError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            enqueue_key: Arc::new(enqueue_key),
            parser: Arc::new(parser),
            store: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handler recording notifications from one pod of one resource.
    /// Unparseable payloads are acked with the parse error; everything else
    /// is acked after the merge.
    pub fn message_handler(
        &self,
        resource: ResourceRef,
        pod_ip: impl Into<String>,
        merger: ValueMerger<P>,
    ) -> Arc<dyn MessageHandler> {
        Arc::new(StoreHandler {
            store: self.store.clone(),
            enqueue_key: self.enqueue_key.clone(),
            parser: self.parser.clone(),
            resource,
            pod_ip: pod_ip.into(),
            merger,
        })
    }

    pub fn pod_notification(&self, resource: &ResourceRef, pod_ip: &str) -> Option<P> {
        self.store
            .lock()
            .get(resource)
            .and_then(|pods| pods.get(pod_ip))
            .cloned()
    }

    pub fn pods_notifications(&self, resource: &ResourceRef) -> Option<HashMap<String, P>> {
        self.store.lock().get(resource).cloned()
    }

    pub fn clean_pod_notification(&self, resource: &ResourceRef, pod_ip: &str) {
        let mut store = self.store.lock();
        if let Some(pods) = store.get_mut(resource) {
            pods.remove(pod_ip);
            if pods.is_empty() {
                store.remove(resource);
            }
        }
    }

    pub fn clean_pods_notifications(&self, resource: &ResourceRef) {
        self.store.lock().remove(resource);
    }
}

struct StoreHandler<P> {
    store: Store<P>,
    enqueue_key: EnqueueFn,
    parser: Parser<P>,
    resource: ResourceRef,
    pod_ip: String,
    merger: ValueMerger<P>,
}

#[async_trait]
impl<P> MessageHandler for StoreHandler<P>
where
    P: Clone + PartialEq + Send + Sync + 'static,
{
    async fn handle_message(&self, message: ServiceMessage) {
        let value = match (self.parser)(message.payload()) {
            Ok(value) => value,
            Err(err) => {
                warn!(resource = %self.resource, pod = %self.pod_ip, error = %err, "discarding unparseable notification");
                message.ack_with_error(err);
                return;
            }
        };

        let changed = {
            let mut store = self.store.lock();
            let pods = store.entry(self.resource.clone()).or_default();
            let old = pods.get(&self.pod_ip).cloned();
            match (self.merger)(old.as_ref(), value) {
                Some(merged) => {
                    let changed = old.as_ref() != Some(&merged);
                    pods.insert(self.pod_ip.clone(), merged);
                    changed
                }
                None => {
                    let removed = pods.remove(&self.pod_ip).is_some();
                    if pods.is_empty() {
                        store.remove(&self.resource);
                    }
                    removed
                }
            }
        };

        message.ack();

        if changed {
            (self.enqueue_key)(self.resource.clone());
        }
    }
}
