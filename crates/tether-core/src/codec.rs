//! Async frame codec.
//!
//! Decoding is all-or-nothing per frame: `read_exact` retries short reads
//! until the header and payload are complete or the reader reports an error.
//! Encoding goes through [`Message::encode`] so header and payload land in a
//! single buffer and can be flushed with one logical write, which keeps
//! frames untorn under TLS record framing.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::error::FrameError;
use crate::frame::{Message, HEADER_LEN, PROTOCOL_VERSION};

/// Read exactly one frame from `reader`.
///
/// `max_payload` bounds the length field; anything above it is corruption,
/// not an allocation request.
pub async fn read_message<R>(reader: &mut R, max_payload: usize) -> Result<Message, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    read_exact(reader, &mut header).await?;

    let version = header[0];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::BadVersion { found: version });
    }

    let flags = header[1];
    let opcode = header[2];
    let mut uuid_bytes = [0u8; 16];
    uuid_bytes.copy_from_slice(&header[3..19]);
    let uuid = Uuid::from_bytes(uuid_bytes);
    let length = u32::from_be_bytes([header[19], header[20], header[21], header[22]]);

    if length as usize > max_payload {
        return Err(FrameError::PayloadTooLarge { length, cap: max_payload });
    }

    let mut payload = vec![0u8; length as usize];
    read_exact(reader, &mut payload).await?;

    Ok(Message::from_parts(version, flags, opcode, uuid, Bytes::from(payload)))
}

/// Write one frame: a single `write_all` of the encoded buffer plus a flush.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&message.encode()).await?;
    writer.flush().await
}

async fn read_exact<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::Eof),
        Err(e) => Err(FrameError::Io(e)),
    }
}
