//! Converges a desired set of peer addresses to live control channels.
//!
//! The pool is keyed twice: an opaque `key` groups the channels belonging to
//! one resource, and each channel is addressed by `host:port`. Reconciling a
//! key dials what is missing (in parallel), tears down what is no longer
//! wanted, and reports both through callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tether_core::Service;
use tether_net::{start_control_client, ControlClient, DialError, Dialer, TcpDialer};

/// Decorates every service the pool creates, e.g. the caching send-dedup
/// wrapper.
pub type ServiceWrapper = Arc<dyn Fn(Arc<dyn Service>) -> Arc<dyn Service> + Send + Sync>;

#[derive(Default)]
pub struct PoolOptions {
    service_wrapper: Option<ServiceWrapper>,
}

impl PoolOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service_wrapper(mut self, wrapper: ServiceWrapper) -> Self {
        self.service_wrapper = Some(wrapper);
        self
    }
}

struct PoolEntry {
    service: Arc<dyn Service>,
    cancel: CancellationToken,
    client: Arc<ControlClient>,
}

type ConnsMap = HashMap<String, HashMap<String, PoolEntry>>;

pub struct ControlPlaneConnectionPool {
    cancel: CancellationToken,
    dialer: Arc<dyn Dialer>,
    service_wrapper: Option<ServiceWrapper>,
    conns: Mutex<ConnsMap>,
}

impl ControlPlaneConnectionPool {
    pub fn new(cancel: CancellationToken, dialer: Arc<dyn Dialer>, options: PoolOptions) -> Self {
        Self {
            cancel: cancel.child_token(),
            dialer,
            service_wrapper: options.service_wrapper,
            conns: Mutex::new(HashMap::new()),
        }
    }

    /// Pool of plaintext connections.
    pub fn insecure(cancel: CancellationToken, options: PoolOptions) -> Self {
        Self::new(cancel, Arc::new(TcpDialer::default()), options)
    }

    /// Converge the channels under `key` to `desired_addresses`.
    ///
    /// New addresses are dialed in parallel and reported through `on_new`;
    /// dropped addresses are cancelled, awaited to quiescence and reported
    /// through `on_removed`. Returns the resulting `address → service` view.
    ///
    /// Safe to call concurrently for different keys; calls for the same key
    /// are the caller's to serialize (interleaving them cannot corrupt the
    /// pool, but may observe intermediate views).
    pub async fn reconcile_connections<N, R>(
        &self,
        key: &str,
        desired_addresses: Vec<String>,
        on_new: N,
        on_removed: R,
    ) -> Result<HashMap<String, Arc<dyn Service>>, DialError>
    where
        N: Fn(&str, Arc<dyn Service>),
        R: Fn(&str),
    {
        // Stale entries leave the map under the lock, but their teardown is
        // awaited outside it.
        let removed: Vec<(String, PoolEntry)> = {
            let mut conns = self.conns.lock();
            match conns.get_mut(key) {
                Some(entries) => {
                    let stale: Vec<String> = entries
                        .keys()
                        .filter(|address| !desired_addresses.contains(address))
                        .cloned()
                        .collect();
                    let removed = stale
                        .into_iter()
                        .filter_map(|address| entries.remove(&address).map(|e| (address, e)))
                        .collect();
                    if entries.is_empty() {
                        conns.remove(key);
                    }
                    removed
                }
                None => Vec::new(),
            }
        };
        for (address, entry) in removed {
            debug!(key, %address, "closing control channel");
            entry.cancel.cancel();
            entry.client.closed().await;
            on_removed(&address);
        }

        let missing: Vec<String> = {
            let conns = self.conns.lock();
            desired_addresses
                .into_iter()
                .filter(|address| {
                    !conns
                        .get(key)
                        .is_some_and(|entries| entries.contains_key(address))
                })
                .collect()
        };

        let dials = missing.into_iter().map(|address| {
            let dialer = self.dialer.clone();
            let cancel = self.cancel.child_token();
            async move {
                let client = start_control_client(cancel.clone(), dialer, address.clone()).await?;
                Ok::<_, DialError>((address, cancel, Arc::new(client)))
            }
        });

        for dialed in futures::future::join_all(dials).await {
            let (address, cancel, client) = dialed?;
            info!(key, %address, "opened control channel");

            let service: Arc<dyn Service> = client.clone();
            let service = match &self.service_wrapper {
                Some(wrapper) => wrapper(service),
                None => service,
            };

            self.conns
                .lock()
                .entry(key.to_string())
                .or_default()
                .insert(
                    address.clone(),
                    PoolEntry {
                        service: service.clone(),
                        cancel,
                        client,
                    },
                );
            on_new(&address, service);
        }

        Ok(self.view(key))
    }

    /// Current service for `(key, address)`, if any.
    pub fn resolve(&self, key: &str, address: &str) -> Option<Arc<dyn Service>> {
        self.conns
            .lock()
            .get(key)
            .and_then(|entries| entries.get(address))
            .map(|entry| entry.service.clone())
    }

    /// Tear down every channel under `key`.
    pub async fn remove_all_connections(&self, key: &str) {
        let removed = self.conns.lock().remove(key).unwrap_or_default();
        for (address, entry) in removed {
            debug!(key, %address, "closing control channel");
            entry.cancel.cancel();
            entry.client.closed().await;
        }
    }

    /// Cancel every owned connection and empty the pool.
    pub async fn close(&self) {
        self.cancel.cancel();
        let drained: Vec<PoolEntry> = {
            let mut conns = self.conns.lock();
            conns.drain().flat_map(|(_, entries)| entries.into_values()).collect()
        };
        for entry in drained {
            entry.cancel.cancel();
            entry.client.closed().await;
        }
    }

    fn view(&self, key: &str) -> HashMap<String, Arc<dyn Service>> {
        self.conns
            .lock()
            .get(key)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(address, entry)| (address.clone(), entry.service.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}
