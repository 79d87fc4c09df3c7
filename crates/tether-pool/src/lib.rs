//! Reconciliation layer of the tether control protocol: the connection pool
//! that converges desired peer addresses to live channels, the per-pod
//! notification stores fed by those channels, and the delay scheduler used
//! to requeue resources.

pub mod async_command_store;
pub mod pool;
pub mod scheduler;
pub mod store;

pub use async_command_store::AsyncCommandNotificationStore;
pub use pool::{ControlPlaneConnectionPool, PoolOptions, ServiceWrapper};
pub use scheduler::DelayScheduler;
pub use store::{pass_new_value, NotificationStore, ResourceRef, ValueMerger};
