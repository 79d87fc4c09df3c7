//! Core types for the tether control protocol: the wire frame and codec,
//! the `Connection` transport abstraction, and the `Service` surface both
//! peers expose.

pub mod async_command;
pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod service;

pub use async_command::{int64_command_id, AsyncCommandResult};
pub use codec::{read_message, write_message};
pub use connection::Connection;
pub use error::{ConnectionError, FrameError, PayloadError, ServiceError};
pub use frame::{
    Message, OpCode, ACK_OPCODE, DEFAULT_MAX_PAYLOAD, FLAG_REQUIRES_ACK, HEADER_LEN,
    PROTOCOL_VERSION,
};
pub use service::{
    error_handler_fn, handler_fn, ErrorHandler, MessageHandler, NoopMessageHandler, Payload,
    Service, ServiceExt, ServiceMessage,
};
