//! Service layer of the tether control protocol: the ack-correlating
//! [`ControlService`], plus the decorators and handlers built on top of the
//! [`tether_core::Service`] trait.

pub mod async_command;
pub mod caching;
pub mod router;
pub mod service;

pub use async_command::AsyncCommandHandler;
pub use caching::{with_caching, CachingService};
pub use router::MessageRouter;
pub use service::ControlService;
