//! On-the-wire frame layout.
//!
//! Every frame is a fixed 23-byte header followed by an opaque payload:
//!
//! ```text
//! offset
//!    0  version (u8, currently 1)
//!    1  flags (u8, bit 0 = requires-ack, remaining bits reserved)
//!    2  opcode (u8, 0 reserved for Ack)
//!    3  ┐
//!    …  │ correlation uuid (16 bytes, RFC 4122 v4 when generated locally)
//!   18  ┘
//!   19  ┐
//!   …   │ payload length (u32, big-endian)
//!   22  ┘
//! ------
//!    payload (length bytes, opaque)
//! ```
//!
//! An Ack frame carries the uuid of the request it acknowledges; an empty
//! payload means success, a non-empty payload is a UTF-8 error string.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// Current wire protocol version. A peer speaking a different version is
/// treated as corrupt and the connection is torn down.
pub const PROTOCOL_VERSION: u8 = 1;

/// Opcode reserved for acknowledgements. Application opcodes are 1-255.
pub const ACK_OPCODE: OpCode = 0;

/// Flag bit: the sender expects an Ack frame carrying this frame's uuid.
pub const FLAG_REQUIRES_ACK: u8 = 0b0000_0001;

/// Fixed header size: version(1) + flags(1) + opcode(1) + uuid(16) + length(4).
pub const HEADER_LEN: usize = 23;

/// Default payload cap. A length field above this is treated as protocol
/// corruption rather than an allocation request.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Application-level message kind. One byte on the wire.
pub type OpCode = u8;

/// A single control-protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    version: u8,
    flags: u8,
    opcode: OpCode,
    uuid: Uuid,
    payload: Bytes,
}

impl Message {
    /// Build an outbound request frame with a freshly generated uuid and the
    /// requires-ack flag set.
    pub fn request(opcode: OpCode, payload: Bytes) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: FLAG_REQUIRES_ACK,
            opcode,
            uuid: Uuid::new_v4(),
            payload,
        }
    }

    /// Build an Ack frame answering the request identified by `uuid`.
    /// An empty payload signals success.
    pub fn ack(uuid: Uuid, payload: Bytes) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: 0,
            opcode: ACK_OPCODE,
            uuid,
            payload,
        }
    }

    /// Build a frame with explicit parts. Primarily useful in tests and
    /// protocol tooling; `request`/`ack` cover the normal paths.
    pub fn new(uuid: Uuid, opcode: OpCode, payload: Bytes) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags: FLAG_REQUIRES_ACK,
            opcode,
            uuid,
            payload,
        }
    }

    /// Override the flags byte. Reserved bits round-trip untouched.
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    /// Override the version byte.
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Payload byte count as it appears in the header.
    pub fn length(&self) -> u32 {
        self.payload.len() as u32
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    pub fn requires_ack(&self) -> bool {
        self.flags & FLAG_REQUIRES_ACK != 0
    }

    pub fn is_ack(&self) -> bool {
        self.opcode == ACK_OPCODE
    }

    /// Serialize header and payload into a single contiguous buffer so the
    /// transport can issue one logical write per frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Serialize into the tail of an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(HEADER_LEN + self.payload.len());
        buf.put_u8(self.version);
        buf.put_u8(self.flags);
        buf.put_u8(self.opcode);
        buf.put_slice(self.uuid.as_bytes());
        buf.put_u32(self.payload.len() as u32);
        buf.put_slice(&self.payload);
    }

    pub(crate) fn from_parts(version: u8, flags: u8, opcode: OpCode, uuid: Uuid, payload: Bytes) -> Self {
        Self {
            version,
            flags,
            opcode,
            uuid,
            payload,
        }
    }
}
