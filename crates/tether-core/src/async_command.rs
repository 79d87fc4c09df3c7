//! Async command result payload.
//!
//! A controller sends a command which the data plane acks as soon as it is
//! received; the actual work may take a while. When it completes, the data
//! plane reports back with an `AsyncCommandResult` frame carrying the
//! command id and, on failure, an error string.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PayloadError;
use crate::service::Payload;

/// Result of an asynchronous command execution.
///
/// Wire layout, both fields u32 big-endian length-prefixed so a parser can
/// slice without copying:
///
/// ```text
/// [ id_len: u32 ][ command_id: id_len bytes ]
/// [ err_len: u32 ][ error: err_len bytes ]     only present on failure
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsyncCommandResult {
    pub command_id: Bytes,
    /// Error string of the failed execution; `None` when the command
    /// succeeded.
    pub error: Option<String>,
}

impl AsyncCommandResult {
    pub fn ok(command_id: Bytes) -> Self {
        Self { command_id, error: None }
    }

    pub fn failed(command_id: Bytes, error: impl Into<String>) -> Self {
        Self {
            command_id,
            error: Some(error.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// Zero-copy parse: `command_id` is a slice of the input buffer.
    pub fn decode(data: &Bytes) -> Result<Self, PayloadError> {
        if data.len() < 4 {
            return Err(PayloadError::new("async command result shorter than the id length prefix"));
        }
        let id_len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + id_len {
            return Err(PayloadError::new(format!(
                "async command result truncated: id length {} but {} bytes remain",
                id_len,
                data.len() - 4
            )));
        }
        let command_id = data.slice(4..4 + id_len);

        let rest = &data[4 + id_len..];
        let error = if rest.is_empty() {
            None
        } else {
            if rest.len() < 4 {
                return Err(PayloadError::new("async command result shorter than the error length prefix"));
            }
            let err_len = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]) as usize;
            if rest.len() < 4 + err_len {
                return Err(PayloadError::new("async command result truncated in the error section"));
            }
            let err = std::str::from_utf8(&rest[4..4 + err_len])
                .map_err(|e| PayloadError::new(format!("error string is not utf-8: {e}")))?;
            Some(err.to_owned())
        };

        Ok(Self { command_id, error })
    }
}

impl Payload for AsyncCommandResult {
    fn encode_payload(&self) -> Result<Bytes, PayloadError> {
        let err_len = self.error.as_ref().map(|e| 4 + e.len()).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(4 + self.command_id.len() + err_len);
        buf.put_u32(self.command_id.len() as u32);
        buf.put_slice(&self.command_id);
        if let Some(err) = &self.error {
            buf.put_u32(err.len() as u32);
            buf.put_slice(err.as_bytes());
        }
        Ok(buf.freeze())
    }
}

/// Encode an `i64` command id as 8 big-endian bytes.
pub fn int64_command_id(id: i64) -> Bytes {
    Bytes::copy_from_slice(&id.to_be_bytes())
}
