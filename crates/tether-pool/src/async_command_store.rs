use std::sync::Arc;

use tether_core::{int64_command_id, AsyncCommandResult, MessageHandler};

use crate::store::{pass_new_value, NotificationStore, ResourceRef};

/// Notification store specialized to [`AsyncCommandResult`]: keeps the last
/// result each pod reported and answers "has command X completed on pod Y".
pub struct AsyncCommandNotificationStore {
    store: NotificationStore<AsyncCommandResult>,
}

impl AsyncCommandNotificationStore {
    pub fn new(enqueue_key: impl Fn(ResourceRef) + Send + Sync + 'static) -> Self {
        Self {
            store: NotificationStore::new(enqueue_key, |payload| AsyncCommandResult::decode(payload)),
        }
    }

    /// Handler recording results from one pod of one resource. Newer results
    /// replace older ones.
    pub fn message_handler(
        &self,
        resource: ResourceRef,
        pod_ip: impl Into<String>,
    ) -> Arc<dyn MessageHandler> {
        self.store.message_handler(resource, pod_ip, pass_new_value())
    }

    /// The stored result for `(resource, pod)` if it matches `command_id`.
    pub fn command_result(
        &self,
        resource: &ResourceRef,
        pod_ip: &str,
        command_id: &[u8],
    ) -> Option<AsyncCommandResult> {
        self.store
            .pod_notification(resource, pod_ip)
            .filter(|result| result.command_id == command_id)
    }

    /// [`Self::command_result`] for i64 command ids.
    pub fn int64_command_result(
        &self,
        resource: &ResourceRef,
        pod_ip: &str,
        command_id: i64,
    ) -> Option<AsyncCommandResult> {
        self.command_result(resource, pod_ip, &int64_command_id(command_id))
    }

    pub fn clean_pod_notification(&self, resource: &ResourceRef, pod_ip: &str) {
        self.store.clean_pod_notification(resource, pod_ip)
    }

    pub fn clean_pods_notifications(&self, resource: &ResourceRef) {
        self.store.clean_pods_notifications(resource)
    }
}
